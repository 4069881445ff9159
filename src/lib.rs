#![cfg_attr(not(test), no_std)]

// Declared first so the logging macros are visible to every other module.
#[macro_use]
pub mod logging;

pub mod bank;
pub mod config;
pub mod decoder;
pub mod hid_desc;
pub mod pcm;
pub mod ppm;
pub mod receiver;
pub mod srxl;
pub mod timing;

#[cfg(feature = "rp2040")]
pub mod board;

pub use crate::config::*;
pub use crate::decoder::*;
pub use crate::hid_desc::*;
pub use crate::receiver::*;
pub use crate::timing::*;

pub use crate::pcm::PcmDecoder;
pub use crate::ppm::PpmDecoder;
pub use crate::srxl::SrxlDecoder;
