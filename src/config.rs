//! The persisted receiver configuration and its storage seam.

use core::fmt;

use crate::hid_desc::ReportId;


/// Layout version of the configuration record. Records with another version are rejected.
pub const CONFIG_VERSION: u8 = 20;
/// Highest input channel a mapping entry may reference (1-based).
pub const MAX_INPUT_CHANNELS: u8 = 16;
/// Number of joystick axes.
pub const MAX_OUTPUT_CHANNELS: usize = 7;

pub const MIN_SYNC_WIDTH_RANGE: (u16, u16) = (2000, 10_000);
pub const PULSE_WIDTH_CENTER_RANGE: (u16, u16) = (500, 3000);
pub const PULSE_WIDTH_RANGE_RANGE: (u16, u16) = (10, 3000);

/// `flags` bit selecting the inverted signal polarity.
pub const FLAG_INVERTED_SIGNAL: u8 = 1 << 0;


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
	VersionMismatch { found: u8 },
	InvalidLength,
	SyncWidthOutOfRange,
	PulseWidthCenterOutOfRange,
	PulseWidthRangeOutOfRange,
	InvalidMapping { output: u8, input: u8 },
}

impl fmt::Display for ConfigError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConfigError::VersionMismatch { found } => write!(f, "configuration version {found}, expected {CONFIG_VERSION}"),
			ConfigError::InvalidLength => write!(f, "configuration record has the wrong length"),
			ConfigError::SyncWidthOutOfRange => write!(f, "minimum sync width out of range"),
			ConfigError::PulseWidthCenterOutOfRange => write!(f, "pulse width center out of range"),
			ConfigError::PulseWidthRangeOutOfRange => write!(f, "pulse width range out of range"),
			ConfigError::InvalidMapping { output, input } => write!(f, "output {output} mapped to invalid input {input}"),
		}
	}
}


/// Receiver settings.
///
/// Serialized as a 20-byte little endian record which doubles as the payload of the
/// configuration HID report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Configuration {
	pub flags: u8,
	/// Shortest PPM pause recognised as a frame boundary, in µs.
	pub min_sync_width: u16,
	/// Pulse width mapped to the axis center, in µs.
	pub pulse_width_center: u16,
	/// Pulse width deviation from the center mapped to full deflection, in µs.
	pub pulse_width_range: u16,
	/// PPM clock skew correction, 0x8000 is 1.0.
	pub clock_correction: u16,
	/// Bit `n` inverts output channel `n`.
	pub invert: u8,
	/// Input channel (1-based) driving each output channel, 0 when unmapped.
	pub mapping: [u8; MAX_OUTPUT_CHANNELS],
}

impl Configuration {
	pub const SIZE: usize = 20;

	pub const DEFAULT: Self = Self {
		flags: 0,
		min_sync_width: 3500,
		pulse_width_center: 1500,
		pulse_width_range: 550,
		clock_correction: 0x8000,
		invert: 0,
		mapping: [1, 2, 3, 4, 5, 6, 7],
	};

	pub fn inverted_signal(&self) -> bool {
		self.flags & FLAG_INVERTED_SIGNAL != 0
	}

	/// Sets the inverted signal option.
	pub fn with_inverted_signal(&mut self, inverted: bool) -> &mut Self {
		if inverted {
			self.flags |= FLAG_INVERTED_SIGNAL;
		}
		else {
			self.flags &= !FLAG_INVERTED_SIGNAL;
		}

		self
	}

	/// Maps `output` to the 1-based `input` channel, or unmaps it with 0.
	pub fn with_mapping(&mut self, output: usize, input: u8) -> &mut Self {
		if let Some(entry) = self.mapping.get_mut(output) {
			*entry = input;
		}

		self
	}

	/// Sets whether `output` is inverted.
	pub fn with_output_inverted(&mut self, output: usize, inverted: bool) -> &mut Self {
		if output < MAX_OUTPUT_CHANNELS {
			if inverted {
				self.invert |= 1 << output;
			}
			else {
				self.invert &= !(1 << output);
			}
		}

		self
	}

	pub fn is_output_inverted(&self, output: usize) -> bool {
		output < MAX_OUTPUT_CHANNELS && self.invert & (1 << output) != 0
	}

	/// Checks every field against its bounds.
	pub fn validate(&self) -> Result<(), ConfigError> {
		let within = |value: u16, (min, max): (u16, u16)| (min..=max).contains(&value);

		if !within(self.min_sync_width, MIN_SYNC_WIDTH_RANGE) {
			return Err(ConfigError::SyncWidthOutOfRange);
		}

		if !within(self.pulse_width_center, PULSE_WIDTH_CENTER_RANGE) {
			return Err(ConfigError::PulseWidthCenterOutOfRange);
		}

		if !within(self.pulse_width_range, PULSE_WIDTH_RANGE_RANGE) {
			return Err(ConfigError::PulseWidthRangeOutOfRange);
		}

		for (output, input) in self.mapping.iter().enumerate() {
			if *input > MAX_INPUT_CHANNELS {
				return Err(ConfigError::InvalidMapping { output: output as u8, input: *input });
			}
		}

		Ok(())
	}

	/// Converts the configuration into its persisted record.
	/// The first byte is the configuration report ID.
	pub fn to_bytes(&self) -> [u8; Self::SIZE] {
		let mut bytes = [0u8; Self::SIZE];

		bytes[0] = ReportId::Configuration as u8;
		bytes[1] = CONFIG_VERSION;
		bytes[2] = self.flags;
		bytes[4..6].copy_from_slice(&self.min_sync_width.to_le_bytes());
		bytes[6..8].copy_from_slice(&self.pulse_width_center.to_le_bytes());
		bytes[8..10].copy_from_slice(&self.pulse_width_range.to_le_bytes());
		bytes[10..12].copy_from_slice(&self.clock_correction.to_le_bytes());
		bytes[12] = self.invert;
		bytes[13..].copy_from_slice(&self.mapping);

		bytes
	}

	/// Parses and validates a persisted record.
	pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
		let bytes: &[u8; Self::SIZE] = bytes.try_into().map_err(|_| ConfigError::InvalidLength)?;

		if bytes[1] != CONFIG_VERSION {
			return Err(ConfigError::VersionMismatch { found: bytes[1] });
		}

		let word = |offset: usize| u16::from_le_bytes([bytes[offset], bytes[offset + 1]]);
		let mut mapping = [0u8; MAX_OUTPUT_CHANNELS];
		mapping.copy_from_slice(&bytes[13..]);

		let configuration = Self {
			flags: bytes[2],
			min_sync_width: word(4),
			pulse_width_center: word(6),
			pulse_width_range: word(8),
			clock_correction: word(10),
			invert: bytes[12],
			mapping,
		};

		configuration.validate()?;
		Ok(configuration)
	}
}

impl Default for Configuration {
	fn default() -> Self {
		Self::DEFAULT
	}
}


/// Non-volatile storage holding one configuration record.
pub trait ConfigStore {
	type Error;

	fn read_block(&mut self, block: &mut [u8; Configuration::SIZE]) -> Result<(), Self::Error>;
	fn write_block(&mut self, block: &[u8; Configuration::SIZE]) -> Result<(), Self::Error>;

	/// Reads the stored configuration. Returns `None` if it cannot be read or is invalid.
	fn load(&mut self) -> Option<Configuration> {
		let mut block = [0u8; Configuration::SIZE];
		if self.read_block(&mut block).is_err() {
			crate::log_warn!("Configuration storage read failed");
			return None;
		}

		match Configuration::from_bytes(&block) {
			Ok(configuration) => Some(configuration),
			Err(error) => {
				crate::log_warn!("Stored configuration rejected: {:?}", error);
				None
			}
		}
	}

	fn save(&mut self, configuration: &Configuration) -> Result<(), Self::Error> {
		self.write_block(&configuration.to_bytes())
	}
}


/// A configuration store in RAM. Starts erased.
#[derive(Clone, Debug)]
pub struct MemoryStore {
	block: [u8; Configuration::SIZE],
}

impl MemoryStore {
	pub const fn new() -> Self {
		Self { block: [0xFF; Configuration::SIZE] }
	}

	pub fn block(&self) -> &[u8; Configuration::SIZE] {
		&self.block
	}
}

impl Default for MemoryStore {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigStore for MemoryStore {
	type Error = core::convert::Infallible;

	fn read_block(&mut self, block: &mut [u8; Configuration::SIZE]) -> Result<(), Self::Error> {
		block.copy_from_slice(&self.block);
		Ok(())
	}

	fn write_block(&mut self, block: &[u8; Configuration::SIZE]) -> Result<(), Self::Error> {
		self.block = *block;
		Ok(())
	}
}
