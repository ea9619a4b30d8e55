#![allow(unused_macros)]

/// Evaluates to `Ok` of the given expression if `$success` is truthy, and to the last OS error
/// otherwise.
macro_rules! ok_or_ret_errno {
    ($success:expr => $($scb:tt)+) => {
        if $success {
            Ok($($scb)+)
        } else {
            Err(::std::io::Error::last_os_error())
        }
    };
}
