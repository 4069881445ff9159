//! Logging macros.
//!
//! With the `defmt` feature enabled the macros forward to `defmt` (transported over RTT by the
//! firmware). Host unit tests print to stdout. Any other build compiles them away, while still
//! type-checking the arguments.
//!
//! Only `{}` and `{:?}` placeholders are used so the same format string is valid for both
//! `defmt` and `core::fmt`.


/// Logs an informational message.
#[macro_export]
macro_rules! log_info {
	($($arg:tt)*) => {{
		#[cfg(feature = "defmt")]
		::defmt::info!($($arg)*);

		#[cfg(all(not(feature = "defmt"), test))]
		println!("[INFO] {}", format!($($arg)*));

		#[cfg(all(not(feature = "defmt"), not(test)))]
		let _ = ::core::format_args!($($arg)*);
	}};
}

/// Logs a warning.
#[macro_export]
macro_rules! log_warn {
	($($arg:tt)*) => {{
		#[cfg(feature = "defmt")]
		::defmt::warn!($($arg)*);

		#[cfg(all(not(feature = "defmt"), test))]
		println!("[WARN] {}", format!($($arg)*));

		#[cfg(all(not(feature = "defmt"), not(test)))]
		let _ = ::core::format_args!($($arg)*);
	}};
}

/// Logs an error.
#[macro_export]
macro_rules! log_error {
	($($arg:tt)*) => {{
		#[cfg(feature = "defmt")]
		::defmt::error!($($arg)*);

		#[cfg(all(not(feature = "defmt"), test))]
		eprintln!("[ERROR] {}", format!($($arg)*));

		#[cfg(all(not(feature = "defmt"), not(test)))]
		let _ = ::core::format_args!($($arg)*);
	}};
}

/// Logs a debug message. Cheap enough for interrupt context when `defmt` is used.
#[macro_export]
macro_rules! log_debug {
	($($arg:tt)*) => {{
		#[cfg(feature = "defmt")]
		::defmt::debug!($($arg)*);

		#[cfg(all(not(feature = "defmt"), test))]
		println!("[DEBUG] {}", format!($($arg)*));

		#[cfg(all(not(feature = "defmt"), not(test)))]
		let _ = ::core::format_args!($($arg)*);
	}};
}
