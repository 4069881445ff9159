use core::fmt;

use crate::config::{ConfigError, ConfigStore, Configuration};
use crate::decoder::{Decoder, Decoders, Hooks, NoHooks, SignalSource};
use crate::hid_desc::{ConfigurationReport, DiagnosticReport, JoystickReport, ReportId, DIAGNOSTIC_CHANNELS};
use crate::timing::Clock;


/// The value of a centered or missing channel.
pub const NEUTRAL_VALUE: u8 = 0x80;


/// Errors returned when processing a host command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
	/// The report ID is not a command.
	UnknownReport(u8),
	/// The configuration sent by the host was rejected.
	InvalidConfiguration(ConfigError),
	/// The configuration store failed.
	Storage,
}

impl From<ConfigError> for CommandError {
	fn from(error: ConfigError) -> Self {
		CommandError::InvalidConfiguration(error)
	}
}

impl fmt::Display for CommandError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CommandError::UnknownReport(id) => write!(f, "unknown report {id}"),
			CommandError::InvalidConfiguration(error) => write!(f, "invalid configuration: {error}"),
			CommandError::Storage => write!(f, "configuration storage failed"),
		}
	}
}


/// What the caller must do after a command was processed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Response {
	Handled,
	/// Reboot into the USB bootloader.
	EnterBootloader,
}


/// Combines the decoders into a single set of joystick channels.
///
/// The receiver owns the configuration and publishes the parts the decoders need. Call
/// [`Receiver::update`] from the main loop before reading channel values.
pub struct Receiver<'d, C: Clock, H: Hooks = NoHooks> {
	decoders: &'d Decoders<C, H>,
	configuration: Configuration,
	signal_source: SignalSource,
	options: ReceiverOptions,
}

impl<'d, C: Clock, H: Hooks> Receiver<'d, C, H> {
	/// Creates a receiver with the default configuration and applies it to the decoders.
	pub fn new(decoders: &'d Decoders<C, H>) -> Self {
		let receiver = Self {
			decoders,
			configuration: Configuration::DEFAULT,
			signal_source: SignalSource::None,
			options: ReceiverOptions::default(),
		};

		receiver.apply_configuration();
		receiver
	}

	/// Selects the signal source from the decoders currently receiving.
	pub fn update(&mut self) {
		let mut receiving = self.decoders
			.all()
			.into_iter()
			.filter(|decoder| decoder.is_receiving())
			.map(|decoder| decoder.source());

		let selected = match self.options.source_selection {
			SourceSelection::LastReceiving => receiving.last(),
			SourceSelection::FirstReceiving => receiving.next(),
		};
		let signal_source = selected.unwrap_or(SignalSource::None);

		if signal_source != self.signal_source {
			log_info!("Signal source: {:?}", signal_source);
			self.signal_source = signal_source;
		}
	}

	pub fn signal_source(&self) -> SignalSource {
		self.signal_source
	}

	pub fn channel_count(&self) -> u8 {
		self.active_decoder().map_or(0, |decoder| decoder.channel_count())
	}

	pub fn is_receiving(&self) -> bool {
		self.active_decoder().is_some_and(|decoder| decoder.is_receiving())
	}

	pub fn has_new_data(&self) -> bool {
		self.active_decoder().is_some_and(|decoder| decoder.has_new_data())
	}

	/// Clears the new data flag of every decoder.
	pub fn clear_new_data(&self) {
		for decoder in self.decoders.all() {
			decoder.clear_new_data();
		}
	}

	/// Pulse width in µs of an input channel of the active source, or 0 if absent.
	///
	/// PPM pulse widths are corrected for the transmitter's clock skew.
	pub fn input_channel_data(&self, channel: u8) -> u16 {
		let Some(decoder) = self.active_decoder() else {
			return 0;
		};

		let pulse_width = decoder.channel_pulse_width(channel);
		if decoder.source() == SignalSource::Ppm {
			self.correct_clock_skew(pulse_width)
		}
		else {
			pulse_width
		}
	}

	/// The 8-bit value of an input channel.
	pub fn input_channel_value(&self, channel: u8, invert: bool) -> u8 {
		self.pulse_width_to_value(self.input_channel_data(channel), invert)
	}

	/// The 8-bit value of an output channel, after mapping and inversion.
	pub fn output_channel_value(&self, output: usize) -> u8 {
		match self.configuration.mapping.get(output) {
			Some(&input) if input > 0 => self.input_channel_value(input - 1, self.configuration.is_output_inverted(output)),
			_ => NEUTRAL_VALUE,
		}
	}

	pub fn configuration(&self) -> &Configuration {
		&self.configuration
	}

	/// Replaces the configuration if it is valid.
	pub fn set_configuration(&mut self, configuration: Configuration) -> Result<(), ConfigError> {
		configuration.validate()?;

		self.configuration = configuration;
		self.apply_configuration();
		Ok(())
	}

	pub fn load_defaults(&mut self) {
		self.configuration = Configuration::DEFAULT;
		self.apply_configuration();
	}

	/// Loads the configuration from `store`, falling back to the defaults.
	///
	/// Returns whether the stored configuration was used.
	pub fn load_configuration<S: ConfigStore>(&mut self, store: &mut S) -> bool {
		match store.load() {
			Some(configuration) => {
				self.configuration = configuration;
				self.apply_configuration();
				true
			}
			None => {
				log_warn!("Using the default configuration");
				self.load_defaults();
				false
			}
		}
	}

	pub fn save_configuration<S: ConfigStore>(&self, store: &mut S) -> Result<(), S::Error> {
		store.save(&self.configuration)
	}

	/// Generates a joystick report from the output channels.
	pub fn joystick_report(&self) -> JoystickReport {
		JoystickReport::from_axes(core::array::from_fn(|output| self.output_channel_value(output)))
	}

	/// Generates a diagnostic report. `update_interval_ms` is the time between the last two frames.
	pub fn diagnostic_report(&self, update_interval_ms: u16) -> DiagnosticReport {
		let mut report = DiagnosticReport {
			signal_source: self.signal_source as u8,
			channel_count: self.channel_count(),
			update_interval: update_interval_ms.to_le_bytes(),
			..Default::default()
		};

		for channel in 0..DIAGNOSTIC_CHANNELS {
			report.set_pulse_width(channel, self.input_channel_data(channel as u8));
			report.values[channel] = self.input_channel_value(channel as u8, false);
		}

		report
	}

	pub fn configuration_report(&self) -> ConfigurationReport {
		ConfigurationReport::new(&self.configuration)
	}

	/// Processes a report sent by the host. The first byte is the report ID.
	pub fn process_command<S: ConfigStore>(&mut self, report: &[u8], store: &mut S) -> Result<Response, CommandError> {
		let id = report.first().copied().unwrap_or(0);

		match ReportId::try_from(id) {
			Ok(ReportId::Configuration) => {
				self.set_configuration(Configuration::from_bytes(report)?)?;
				log_info!("Configuration updated");
			}
			Ok(ReportId::LoadDefaults) => self.load_defaults(),
			Ok(ReportId::ReadFromStorage) => {
				self.load_configuration(store);
			}
			Ok(ReportId::WriteToStorage) => {
				self.save_configuration(store).map_err(|_| CommandError::Storage)?;
				log_info!("Configuration saved");
			}
			Ok(ReportId::JumpToBootloader) => return Ok(Response::EnterBootloader),
			_ => return Err(CommandError::UnknownReport(id)),
		}

		Ok(Response::Handled)
	}

	/// Retrieves the receiver's current options. Options can be chained for easier modification.
	pub fn options(&mut self) -> &mut ReceiverOptions {
		&mut self.options
	}

	fn active_decoder(&self) -> Option<&'d dyn Decoder> {
		self.decoders.get(self.signal_source)
	}

	/// Publishes the decoder-visible settings in one step.
	fn apply_configuration(&self) {
		let configuration = &self.configuration;

		critical_section::with(|_| {
			self.decoders.ppm.set_min_sync_width(configuration.min_sync_width);
			self.decoders.set_inverted_signal(configuration.inverted_signal());
		});

		log_info!(
			"Configuration: min sync width {} us, inverted signal {}",
			configuration.min_sync_width,
			configuration.inverted_signal()
		);
	}

	fn correct_clock_skew(&self, pulse_width: u16) -> u16 {
		(2 * pulse_width as u32 * self.configuration.clock_correction as u32 / 0x10000) as u16
	}

	fn pulse_width_to_value(&self, pulse_width: u16, invert: bool) -> u8 {
		if pulse_width == 0 {
			return NEUTRAL_VALUE;
		}

		let center = self.configuration.pulse_width_center as i32;
		let range = self.configuration.pulse_width_range as i32;
		let offset = pulse_width as i32 - center;
		let offset = if invert { -offset } else { offset };

		(128 + 128 * offset / range).clamp(0, u8::MAX as i32) as u8
	}
}


/// Provides various configurations as to how the receiver will operate.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReceiverOptions {
	source_selection: SourceSelection,
}

impl ReceiverOptions {
	/// Sets how the signal source is chosen when several decoders are receiving.
	///
	/// Default is [`SourceSelection::LastReceiving`].
	pub fn with_source_selection(&mut self, source_selection: SourceSelection) -> &mut Self {
		self.source_selection = source_selection;
		self
	}

	pub fn source_selection(&self) -> SourceSelection {
		self.source_selection
	}
}


/// Determines which decoder drives the outputs when several are receiving.
/// Default is [`SourceSelection::LastReceiving`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SourceSelection {
	/// The last receiving decoder in PPM, PCM, SRXL order wins.
	#[default] LastReceiving,
	/// The first receiving decoder in PPM, PCM, SRXL order wins.
	FirstReceiving,
}
