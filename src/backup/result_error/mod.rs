pub mod error;
pub mod result;

/// Wraps an error with a human readable message describing what was attempted.
pub trait AddMsg<S: Into<String>> {
    fn add_msg(self, msg: S) -> Self;
}

/// Wraps an error with the path of the function that produced it.
///
/// Meant to be used together with [`crate::backup::function_path`].
pub trait AddFunctionName<S: Into<String>> {
    fn add_fn_name(self, fn_name: S) -> Self;
}
