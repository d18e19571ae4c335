//! Macros for building and returning [`crate::error::FixtureError`] values.

/// Creates a [`crate::error::FixtureError`] from a kind, a static description
/// and an optional detail.
#[macro_export]
macro_rules! fixture_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::FixtureError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::FixtureError::from(($kind, $desc, $detail.to_string()))
    };
}

/// Returns early with a [`crate::error::FixtureError`].
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return Err($crate::fixture_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return Err($crate::fixture_error!($kind, $desc, $detail))
    };
}
