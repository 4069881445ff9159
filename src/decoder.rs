//! Pieces shared by all signal decoders, and the device state that owns them.

use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::pcm::PcmDecoder;
use crate::ppm::PpmDecoder;
use crate::srxl::SrxlDecoder;
use crate::timing::{Alarm, Clock, Ticks};


/// Number of consecutive periodic ticks without a valid frame before a decoder resets.
pub const TIMEOUT_TICKS: u8 = 100;


/// The decoder currently driving the joystick outputs.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SignalSource {
	#[default] None = 0,
	Ppm = 1,
	Pcm = 2,
	Srxl = 3,
}


/// Frame synchronization state of a decoder.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecoderState {
	WaitingForSync = 0,
	SyncDetected = 1,
	ReceivingData = 2,
}


/// Why a decoder dropped the frame in progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
	/// A gap or symbol outside the protocol's timing.
	Desync,
	/// PCM per-byte checksum mismatch.
	Checksum,
	/// SRXL frame CRC mismatch.
	Crc,
	/// Unknown PCM frame trailer.
	Framing,
}

impl core::fmt::Display for DecodeError {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		match self {
			DecodeError::Desync => write!(f, "timing desync"),
			DecodeError::Checksum => write!(f, "byte checksum mismatch"),
			DecodeError::Crc => write!(f, "frame CRC mismatch"),
			DecodeError::Framing => write!(f, "invalid frame trailer"),
		}
	}
}


/// Notifications raised by the decoders.
///
/// Every method runs in interrupt context and must return quickly. All methods default to
/// doing nothing.
pub trait Hooks {
	/// A frame boundary was detected.
	fn on_sync_detected(&self, _source: SignalSource) {}

	/// A frame passed validation and became the stable bank.
	fn on_frame_received(&self, _source: SignalSource, _channel_count: u8) {}

	/// The frame in progress was dropped.
	fn on_error(&self, _source: SignalSource, _error: DecodeError) {}
}

/// Hooks that ignore every notification.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl Hooks for NoHooks {}


/// The read side of a decoder, as seen by the receiver aggregator.
pub trait Decoder {
	/// The signal source this decoder handles.
	fn source(&self) -> SignalSource;

	/// Whether a valid frame arrived within the timeout window.
	fn is_receiving(&self) -> bool;

	/// Whether a frame arrived since the last [`Decoder::clear_new_data`].
	fn has_new_data(&self) -> bool;

	fn clear_new_data(&self);

	/// Number of channels in the last complete frame.
	fn channel_count(&self) -> u8;

	/// Pulse width of `channel` in microseconds from the last complete frame, or 0 if the frame
	/// has no such channel.
	fn channel_pulse_width(&self, channel: u8) -> u16;

	/// Timeout bookkeeping, called once per periodic tick.
	fn run_task(&self);

	/// Returns the decoder to its power-on state.
	fn reset(&self);
}


/// [`DecoderState`] in an atomic cell.
pub(crate) struct AtomicState(AtomicU8);

impl AtomicState {
	pub(crate) const fn new() -> Self {
		Self(AtomicU8::new(DecoderState::WaitingForSync as u8))
	}

	#[inline]
	pub(crate) fn load(&self) -> DecoderState {
		match self.0.load(Ordering::Relaxed) {
			1 => DecoderState::SyncDetected,
			2 => DecoderState::ReceivingData,
			_ => DecoderState::WaitingForSync,
		}
	}

	#[inline]
	pub(crate) fn store(&self, state: DecoderState) {
		self.0.store(state as u8, Ordering::Relaxed);
	}
}


/// Published frame bookkeeping common to all decoders.
pub(crate) struct FrameStatus {
	channel_count: AtomicU8,
	idle_ticks: AtomicU8,
	receiving: AtomicBool,
	has_new_data: AtomicBool,
}

impl FrameStatus {
	pub(crate) const fn new() -> Self {
		Self {
			channel_count: AtomicU8::new(0),
			idle_ticks: AtomicU8::new(0),
			receiving: AtomicBool::new(false),
			has_new_data: AtomicBool::new(false),
		}
	}

	/// Records a validated frame. Call after the bank flip.
	pub(crate) fn publish(&self, channel_count: u8) {
		self.channel_count.store(channel_count, Ordering::Relaxed);
		self.idle_ticks.store(0, Ordering::Relaxed);
		self.receiving.store(true, Ordering::Relaxed);
		self.has_new_data.store(true, Ordering::Release);
	}

	/// Counts one idle tick. Returns `true` once the timeout has expired.
	pub(crate) fn tick(&self) -> bool {
		let idle = self.idle_ticks.load(Ordering::Relaxed);
		if idle < TIMEOUT_TICKS {
			self.idle_ticks.store(idle + 1, Ordering::Relaxed);
			false
		}
		else {
			true
		}
	}

	pub(crate) fn reset(&self) {
		self.channel_count.store(0, Ordering::Relaxed);
		self.idle_ticks.store(0, Ordering::Relaxed);
		self.receiving.store(false, Ordering::Relaxed);
		self.has_new_data.store(false, Ordering::Relaxed);
	}

	#[inline]
	pub(crate) fn channel_count(&self) -> u8 {
		self.channel_count.load(Ordering::Relaxed)
	}

	#[inline]
	pub(crate) fn is_receiving(&self) -> bool {
		self.receiving.load(Ordering::Relaxed)
	}

	#[inline]
	pub(crate) fn has_new_data(&self) -> bool {
		self.has_new_data.load(Ordering::Acquire)
	}

	#[inline]
	pub(crate) fn clear_new_data(&self) {
		self.has_new_data.store(false, Ordering::Relaxed);
	}
}


/// All decoders of the device, fed concurrently from the interrupt handlers.
///
/// Every method takes `&self`, so a single instance can live in a `static` and be shared by the
/// capture, alarm, UART and periodic interrupts and the main loop.
pub struct Decoders<C: Clock, H: Hooks = NoHooks> {
	pub ppm: PpmDecoder<C, H>,
	pub pcm: PcmDecoder<C, H>,
	pub srxl: SrxlDecoder<C, H>,
	inverted_signal: AtomicBool,
}

impl<C: Clock, H: Hooks + Copy> Decoders<C, H> {
	pub const fn new(hooks: H) -> Self {
		Self {
			ppm: PpmDecoder::new(hooks),
			pcm: PcmDecoder::new(hooks),
			srxl: SrxlDecoder::new(hooks),
			inverted_signal: AtomicBool::new(false),
		}
	}
}

impl<C: Clock, H: Hooks> Decoders<C, H> {
	/// Dispatches a captured edge of the PPM/PCM input.
	///
	/// `rising_edge` is the electrical polarity; it is flipped when the signal is configured as
	/// inverted. PPM only consumes rising edges, PCM consumes both.
	pub fn on_capture(&self, time: Ticks, rising_edge: bool, ppm_alarm: &mut impl Alarm) {
		let rising_edge = rising_edge != self.inverted_signal.load(Ordering::Relaxed);

		if rising_edge {
			self.ppm.on_edge(time, ppm_alarm);
		}

		self.pcm.on_edge(time, rising_edge);
	}

	/// Periodic tick for every decoder's timeout bookkeeping.
	pub fn run_task(&self) {
		for decoder in self.all() {
			decoder.run_task();
		}
	}

	pub fn reset(&self) {
		for decoder in self.all() {
			decoder.reset();
		}
	}

	pub fn set_inverted_signal(&self, inverted: bool) {
		self.inverted_signal.store(inverted, Ordering::Relaxed);
	}

	pub fn inverted_signal(&self) -> bool {
		self.inverted_signal.load(Ordering::Relaxed)
	}

	/// The decoders in PPM, PCM, SRXL order.
	pub fn all(&self) -> [&dyn Decoder; 3] {
		[&self.ppm, &self.pcm, &self.srxl]
	}

	/// The decoder for `source`, if any.
	pub fn get(&self, source: SignalSource) -> Option<&dyn Decoder> {
		match source {
			SignalSource::Ppm => Some(&self.ppm),
			SignalSource::Pcm => Some(&self.pcm),
			SignalSource::Srxl => Some(&self.srxl),
			SignalSource::None => None,
		}
	}
}
