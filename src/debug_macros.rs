// Debug logging for the checker pipeline.
// Only active in debug builds, and only when MOVEONLY_DEBUG is set in the environment.

use once_cell::sync::Lazy;

pub static DEBUG_ENABLED: Lazy<bool> = Lazy::new(|| {
    std::env::var("MOVEONLY_DEBUG")
        .map(|v| !v.is_empty() && v != "0")
        .unwrap_or(false)
});

#[macro_export]
#[cfg(debug_assertions)]
macro_rules! debug_println {
    ($($arg:tt)*) => {
        if *$crate::debug_macros::DEBUG_ENABLED {
            eprintln!($($arg)*);
        }
    };
}

#[macro_export]
#[cfg(not(debug_assertions))]
macro_rules! debug_println {
    ($($arg:tt)*) => {};
}
