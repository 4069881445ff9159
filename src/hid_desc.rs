use usbd_hid::descriptor::{generator_prelude::*, SerializedDescriptor};

use crate::config::{Configuration, MAX_OUTPUT_CHANNELS};


/// Report IDs of the joystick and vendor interfaces.
///
/// IDs 4 to 7 are commands sent by the host as output reports with an empty payload.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReportId {
	Joystick = 1,
	Diagnostic = 2,
	Configuration = 3,
	LoadDefaults = 4,
	ReadFromStorage = 5,
	WriteToStorage = 6,
	JumpToBootloader = 7,
}

impl TryFrom<u8> for ReportId {
	type Error = u8;

	fn try_from(value: u8) -> Result<Self, Self::Error> {
		Ok(match value {
			1 => ReportId::Joystick,
			2 => ReportId::Diagnostic,
			3 => ReportId::Configuration,
			4 => ReportId::LoadDefaults,
			5 => ReportId::ReadFromStorage,
			6 => ReportId::WriteToStorage,
			7 => ReportId::JumpToBootloader,
			other => return Err(other),
		})
	}
}


/// The size (in bytes) of the joystick report.
pub const HID_JOYSTICK_SIZE: usize = size_of::<JoystickReport>();
/// The size (in bytes) of the diagnostic report.
pub const HID_DIAGNOSTIC_SIZE: usize = size_of::<DiagnosticReport>();
/// The size (in bytes) of the configuration report, in either direction.
pub const HID_CONFIGURATION_SIZE: usize = Configuration::SIZE - 1;
/// Channels listed in the diagnostic report.
pub const DIAGNOSTIC_CHANNELS: usize = 16;


/// One 8-bit axis per output channel, 0x80 is centered.
#[gen_hid_descriptor(
	(collection = APPLICATION, usage_page = GENERIC_DESKTOP, usage = JOYSTICK) = {
		(report_id = 0x01,) = {
			(collection = PHYSICAL, usage = POINTER) = {
				(usage = X,) = {
					#[item_settings data, variable, absolute] x = input;
				};
				(usage = Y,) = {
					#[item_settings data, variable, absolute] y = input;
				};
				(usage = 0x32,) = {
					#[item_settings data, variable, absolute] z = input;
				};
				(usage = 0x33,) = {
					#[item_settings data, variable, absolute] rx = input;
				};
				(usage = 0x34,) = {
					#[item_settings data, variable, absolute] ry = input;
				};
				(usage = 0x35,) = {
					#[item_settings data, variable, absolute] rz = input;
				};
			};
			(usage = 0x36,) = {
				#[item_settings data, variable, absolute] slider = input;
			};
		}
	}
)]
pub struct JoystickReport {
	pub x: u8,
	pub y: u8,
	pub z: u8,
	pub rx: u8,
	pub ry: u8,
	pub rz: u8,
	pub slider: u8,
}

impl JoystickReport {
	/// Builds a report from the output channel values, in axis order.
	pub fn from_axes(axes: [u8; MAX_OUTPUT_CHANNELS]) -> Self {
		let [x, y, z, rx, ry, rz, slider] = axes;
		Self { x, y, z, rx, ry, rz, slider }
	}

	pub fn axes(&self) -> [u8; MAX_OUTPUT_CHANNELS] {
		[self.x, self.y, self.z, self.rx, self.ry, self.rz, self.slider]
	}

	/// Converts the report into raw bytes.
	/// An extra byte is added at the start, this is the report ID.
	pub fn to_bytes(&self) -> [u8; HID_JOYSTICK_SIZE + 1] {
		let mut bytes = [ReportId::Joystick as u8; HID_JOYSTICK_SIZE + 1];
		bytes[1..].copy_from_slice(&self.axes());
		bytes
	}
}

impl Default for JoystickReport {
	fn default() -> Self {
		Self::from_axes([0x80; MAX_OUTPUT_CHANNELS])
	}
}


/// Live view of the decoded signal for the configuration tool.
#[derive(Default)]
#[gen_hid_descriptor(
	(collection = APPLICATION, usage_page = VENDOR_DEFINED_START, usage = 0x01) = {
		(report_id = 0x02,) = {
			(usage = 0x01,) = {
				#[item_settings data, variable, absolute] signal_source = input;
			};
			(usage = 0x02,) = {
				#[item_settings data, variable, absolute] channel_count = input;
			};
			(usage = 0x03,) = {
				#[item_settings data, variable, absolute] update_interval = input;
			};
			(usage = 0x04,) = {
				#[item_settings data, variable, absolute] pulse_widths = input;
			};
			(usage = 0x05,) = {
				#[item_settings data, variable, absolute] values = input;
			};
		}
	}
)]
pub struct DiagnosticReport {
	pub signal_source: u8,
	pub channel_count: u8,
	/// Milliseconds between the last two frames, little endian.
	pub update_interval: [u8; 2],
	/// Input pulse widths in µs, little endian.
	pub pulse_widths: [u8; 32],
	/// Input channel values, not inverted.
	pub values: [u8; 16],
}

impl DiagnosticReport {
	pub fn set_pulse_width(&mut self, channel: usize, pulse_width: u16) {
		if let Some(slot) = self.pulse_widths.get_mut(channel * 2..channel * 2 + 2) {
			slot.copy_from_slice(&pulse_width.to_le_bytes());
		}
	}

	pub fn pulse_width(&self, channel: usize) -> Option<u16> {
		let slot = self.pulse_widths.get(channel * 2..channel * 2 + 2)?;
		Some(u16::from_le_bytes([slot[0], slot[1]]))
	}

	/// Converts the report into raw bytes.
	/// An extra byte is added at the start, this is the report ID.
	pub fn to_bytes(&self) -> [u8; HID_DIAGNOSTIC_SIZE + 1] {
		let mut bytes = [0u8; HID_DIAGNOSTIC_SIZE + 1];
		let values_start = 5 + self.pulse_widths.len();

		bytes[0] = ReportId::Diagnostic as u8;
		bytes[1] = self.signal_source;
		bytes[2] = self.channel_count;
		bytes[3..5].copy_from_slice(&self.update_interval);
		bytes[5..values_start].copy_from_slice(&self.pulse_widths);
		bytes[values_start..].copy_from_slice(&self.values);

		bytes
	}
}


/// The persisted configuration record without its report ID byte.
///
/// Report 3 carries the record in both directions. Reports 4 to 7 are the one-byte host commands.
#[gen_hid_descriptor(
	(collection = APPLICATION, usage_page = VENDOR_DEFINED_START, usage = 0x02) = {
		(report_id = 0x03,) = {
			(usage = 0x01,) = {
				#[item_settings data, variable, absolute] data = input;
			};
			(usage = 0x02,) = {
				#[item_settings data, variable, absolute] update = output;
			};
		};
		(report_id = 0x04,) = {
			(usage = 0x03,) = {
				#[item_settings data, variable, absolute] load_defaults = output;
			};
		};
		(report_id = 0x05,) = {
			(usage = 0x04,) = {
				#[item_settings data, variable, absolute] read_from_storage = output;
			};
		};
		(report_id = 0x06,) = {
			(usage = 0x05,) = {
				#[item_settings data, variable, absolute] write_to_storage = output;
			};
		};
		(report_id = 0x07,) = {
			(usage = 0x06,) = {
				#[item_settings data, variable, absolute] jump_to_bootloader = output;
			};
		};
	}
)]
pub struct ConfigurationReport {
	pub data: [u8; 19],
	pub update: [u8; 19],
	pub load_defaults: u8,
	pub read_from_storage: u8,
	pub write_to_storage: u8,
	pub jump_to_bootloader: u8,
}

impl ConfigurationReport {
	pub fn new(configuration: &Configuration) -> Self {
		let mut data = [0u8; HID_CONFIGURATION_SIZE];
		data.copy_from_slice(&configuration.to_bytes()[1..]);

		Self {
			data,
			update: [0; HID_CONFIGURATION_SIZE],
			load_defaults: 0,
			read_from_storage: 0,
			write_to_storage: 0,
			jump_to_bootloader: 0,
		}
	}

	/// Converts the input report into raw bytes, which equal the persisted record.
	pub fn to_bytes(&self) -> [u8; HID_CONFIGURATION_SIZE + 1] {
		let mut bytes = [ReportId::Configuration as u8; HID_CONFIGURATION_SIZE + 1];
		bytes[1..].copy_from_slice(&self.data);
		bytes
	}
}
