//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Map a value from one range into another.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where
    T: Float,
{
    target_range.0
        + ((value - source_range.0) * (target_range.1 - target_range.0)
            / (source_range.1 - source_range.0))
}

/// Return the euclidian distance between two points on the XY plane.
pub fn dist_2d<T>(x_0: T, y_0: T, x_1: T, y_1: T) -> T
where
    T: Float,
{
    ((x_1 - x_0).powi(2) + (y_1 - y_0).powi(2)).sqrt()
}

/// Normalise an angle in degrees into the range [-180, 180].
///
/// This function will return the representative of `angle_deg` which lies in
/// [-180, 180], so that signed angular errors never wrap the long way round.
pub fn wrap_deg_180<T>(angle_deg: T) -> T
where
    T: Float,
{
    let full_turn = T::from(360.0).unwrap();
    let half_turn = T::from(180.0).unwrap();

    let wrapped = rem_euclid(angle_deg + half_turn, full_turn) - half_turn;

    // rem_euclid can land exactly on the upper bound through float round-off,
    // map it back to the canonical -180.
    if wrapped >= half_turn {
        wrapped - full_turn
    } else {
        wrapped
    }
}

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
///
/// This function is taken from the std library as num is missing it.
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Float,
{
    let r = lhs % rhs;
    if r < T::from(0.0).unwrap() {
        r + rhs.abs()
    } else {
        r
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
