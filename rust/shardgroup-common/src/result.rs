pub type Result<T> = std::result::Result<T, crate::error::Error>;

/// Returns `InvalidArgument` naming `$name` and the failed condition when
/// `$expr` is false.
#[macro_export]
macro_rules! verify_arg {
    ($name:expr, $expr:expr) => {{
        let result = $expr;
        $crate::result::verify_arg(result, stringify!($name), stringify!($expr))?;
    }};
}

/// Returns `IllegalState` with the failed condition when `$expr` is false.
#[macro_export]
macro_rules! verify_state {
    ($expr:expr) => {{
        let result = $expr;
        $crate::result::verify_state(result, stringify!($expr))?;
    }};
}

#[inline]
pub fn verify_arg(predicate: bool, name: &str, condition: &str) -> Result<()> {
    if predicate {
        Ok(())
    } else {
        invalid_arg(name, condition)
    }
}

#[inline]
pub fn verify_state(predicate: bool, condition: &str) -> Result<()> {
    if predicate {
        Ok(())
    } else {
        illegal_state(condition)
    }
}

#[cold]
pub fn invalid_arg(name: &str, condition: &str) -> Result<()> {
    Err(crate::error::ErrorKind::InvalidArgument {
        name: name.to_string(),
        message: condition.to_string(),
    }
    .into())
}

#[cold]
pub fn illegal_state(condition: &str) -> Result<()> {
    Err(crate::error::ErrorKind::IllegalState {
        message: condition.to_string(),
    }
    .into())
}
