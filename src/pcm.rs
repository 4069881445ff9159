//! Multiplex PCM decoder.
//!
//! The transmitter sends each channel byte as four 2-bit symbols followed by a 2-bit checksum
//! symbol. A symbol is the time between two falling edges; one of seven widths encodes the
//! difference between the current and the previous 2-bit value. A low phase of at least 750 µs
//! marks the start of a frame. Eight channel bytes and a 4-bit trailer make a frame; the trailer
//! tells whether the frame carries channels 7 and 8 or 9 and 10 in its last two slots.

use core::marker::PhantomData;
use core::sync::atomic::{AtomicU16, AtomicU8, Ordering};

use crate::bank::FrameBanks;
use crate::decoder::{AtomicState, DecodeError, Decoder, DecoderState, FrameStatus, Hooks, NoHooks, SignalSource};
use crate::timing::{elapsed, us_to_ticks, Clock, Ticks};


pub const MAX_CHANNEL_COUNT: usize = 10;
/// Channel bytes carried by one frame.
pub const CHANNELS_PER_FRAME: u8 = 8;
/// Value reported for channels missing from the last frame.
pub const NEUTRAL_DATA: u8 = 0x80;

/// Trailer of a frame carrying channels 1 to 8.
pub const TRAILER_8_CHANNELS: u8 = 0xC;
/// Trailer of a frame carrying channels 1 to 6, 9 and 10.
pub const TRAILER_10_CHANNELS: u8 = 0x9;

const SYNC_PULSE_WIDTH_US: u16 = 750;
/// Nominal width of symbol 0.
const SYMBOL_BASE_US: u16 = 880;
/// Width difference between adjacent symbols.
const SYMBOL_STEP_US: u16 = 140;

const fn symbol_boundary(hz: u32, symbol: u16) -> Ticks {
	us_to_ticks(hz, SYMBOL_BASE_US + SYMBOL_STEP_US * symbol - SYMBOL_STEP_US / 2)
}

/// Computes the checksum symbol of a channel byte.
pub const fn checksum(value: u8) -> u8 {
	(3 ^ (value >> 6) ^ (value >> 4) ^ (value >> 2) ^ value) & 3
}


pub struct PcmDecoder<C: Clock, H: Hooks = NoHooks> {
	banks: FrameBanks<MAX_CHANNEL_COUNT>,
	status: FrameStatus,
	state: AtomicState,
	last_falling_edge: AtomicU16,
	last_bits: AtomicU8,
	bit_count: AtomicU8,
	current_data: AtomicU8,
	current_channel: AtomicU8,
	hooks: H,
	_clock: PhantomData<C>,
}

impl<C: Clock, H: Hooks> PcmDecoder<C, H> {
	const SYNC_PULSE_WIDTH: Ticks = us_to_ticks(C::HZ, SYNC_PULSE_WIDTH_US);

	/// Lower bounds of symbols 0 to 6. Anything shorter than symbol 0 is symbol 7.
	const SYMBOL_BOUNDS: [Ticks; 7] = [
		symbol_boundary(C::HZ, 0),
		symbol_boundary(C::HZ, 1),
		symbol_boundary(C::HZ, 2),
		symbol_boundary(C::HZ, 3),
		symbol_boundary(C::HZ, 4),
		symbol_boundary(C::HZ, 5),
		symbol_boundary(C::HZ, 6),
	];

	pub const fn new(hooks: H) -> Self {
		Self {
			banks: FrameBanks::new(),
			status: FrameStatus::new(),
			state: AtomicState::new(),
			last_falling_edge: AtomicU16::new(0),
			last_bits: AtomicU8::new(0),
			bit_count: AtomicU8::new(0),
			current_data: AtomicU8::new(0),
			current_channel: AtomicU8::new(0),
			hooks,
			_clock: PhantomData,
		}
	}

	pub fn state(&self) -> DecoderState {
		self.state.load()
	}

	/// Handles an edge captured at `time`.
	pub fn on_edge(&self, time: Ticks, rising_edge: bool) {
		if rising_edge {
			let width = elapsed(self.last_falling_edge.load(Ordering::Relaxed), time);
			if width >= Self::SYNC_PULSE_WIDTH {
				self.state.store(DecoderState::SyncDetected);
				self.hooks.on_sync_detected(SignalSource::Pcm);
			}
			return;
		}

		let width = critical_section::with(|_| {
			let last = self.last_falling_edge.load(Ordering::Relaxed);
			self.last_falling_edge.store(time, Ordering::Relaxed);
			elapsed(last, time)
		});

		match self.state.load() {
			DecoderState::WaitingForSync => {}
			DecoderState::SyncDetected => self.start_frame(),
			DecoderState::ReceivingData => {
				if let Err(error) = self.receive_symbol(Self::symbol(width)) {
					self.wait_for_sync();
					self.hooks.on_error(SignalSource::Pcm, error);
				}
			}
		}
	}

	/// The channel byte from the last complete frame, or [`NEUTRAL_DATA`] if absent.
	pub fn channel_data(&self, channel: u8) -> u8 {
		if channel >= self.status.channel_count() {
			return NEUTRAL_DATA;
		}

		self.banks.stable().get(channel as usize).map_or(NEUTRAL_DATA, |raw| !raw)
	}

	/// Classifies a falling-to-falling width with a balanced comparison tree.
	fn symbol(width: Ticks) -> u8 {
		let bounds = &Self::SYMBOL_BOUNDS;

		if width < bounds[3] {
			if width < bounds[1] {
				if width < bounds[0] { 7 } else { 0 }
			}
			else if width < bounds[2] { 1 } else { 2 }
		}
		else if width < bounds[5] {
			if width < bounds[4] { 3 } else { 4 }
		}
		else if width < bounds[6] { 5 } else { 6 }
	}

	fn start_frame(&self) {
		self.last_bits.store(3, Ordering::Relaxed);
		self.bit_count.store(0, Ordering::Relaxed);
		self.current_data.store(0, Ordering::Relaxed);
		self.current_channel.store(0, Ordering::Relaxed);
		self.state.store(DecoderState::ReceivingData);
	}

	/// Abandons the frame in progress and clears its counters.
	fn wait_for_sync(&self) {
		self.bit_count.store(0, Ordering::Relaxed);
		self.current_data.store(0, Ordering::Relaxed);
		self.current_channel.store(0, Ordering::Relaxed);
		self.state.store(DecoderState::WaitingForSync);
	}

	fn receive_symbol(&self, symbol: u8) -> Result<(), DecodeError> {
		let last_bits = self.last_bits.load(Ordering::Relaxed);
		let bits = symbol.wrapping_sub(3 - last_bits);
		if bits > 3 {
			return Err(DecodeError::Desync);
		}
		self.last_bits.store(bits, Ordering::Relaxed);

		let bit_count = self.bit_count.load(Ordering::Relaxed);
		let data = self.current_data.load(Ordering::Relaxed);

		if bit_count >= 8 {
			if checksum(data) != bits {
				return Err(DecodeError::Checksum);
			}

			let channel = self.current_channel.load(Ordering::Relaxed);
			if (channel as usize) < MAX_CHANNEL_COUNT {
				self.banks.active().set(channel as usize, data);
				self.current_channel.store(channel + 1, Ordering::Relaxed);
			}
			self.bit_count.store(0, Ordering::Relaxed);
			self.current_data.store(0, Ordering::Relaxed);
			return Ok(());
		}

		let bit_count = bit_count + 2;
		let data = (data << 2) | bits;
		self.bit_count.store(bit_count, Ordering::Relaxed);
		self.current_data.store(data, Ordering::Relaxed);

		if self.current_channel.load(Ordering::Relaxed) == CHANNELS_PER_FRAME && bit_count == 4 {
			self.wait_for_sync();
			return self.finish_frame(data);
		}

		Ok(())
	}

	fn finish_frame(&self, trailer: u8) -> Result<(), DecodeError> {
		let channel_count = match trailer {
			TRAILER_8_CHANNELS => 8,
			TRAILER_10_CHANNELS => {
				// Slots 6 and 7 carry channels 9 and 10; keep 7 and 8 from the previous frame.
				let active = self.banks.active();
				let stable = self.banks.stable();
				active.set(8, active.get(6).unwrap_or(0));
				active.set(9, active.get(7).unwrap_or(0));
				active.set(6, stable.get(6).unwrap_or(0));
				active.set(7, stable.get(7).unwrap_or(0));
				10
			}
			_ => return Err(DecodeError::Framing),
		};

		self.banks.flip();
		self.status.publish(channel_count);
		self.hooks.on_frame_received(SignalSource::Pcm, channel_count);
		Ok(())
	}
}

impl<C: Clock, H: Hooks> Decoder for PcmDecoder<C, H> {
	fn source(&self) -> SignalSource {
		SignalSource::Pcm
	}

	fn is_receiving(&self) -> bool {
		self.status.is_receiving()
	}

	fn has_new_data(&self) -> bool {
		self.status.has_new_data()
	}

	fn clear_new_data(&self) {
		self.status.clear_new_data();
	}

	fn channel_count(&self) -> u8 {
		self.status.channel_count()
	}

	fn channel_pulse_width(&self, channel: u8) -> u16 {
		if channel >= self.status.channel_count() {
			return 0;
		}

		1050 + 138 * self.channel_data(channel) as u16 / 32
	}

	fn run_task(&self) {
		// No frame may be published between the expiry check and the reset.
		critical_section::with(|_| {
			if self.status.tick() {
				self.reset();
			}
		});
	}

	fn reset(&self) {
		critical_section::with(|_| {
			self.wait_for_sync();
			self.banks.reset();
			self.status.reset();
		});
	}
}


/// Builds the edge sequence a transmitter would send, as `(time, rising_edge)` pairs.
#[cfg(test)]
pub(crate) mod encode {
	use std::vec::Vec;

	use super::*;

	pub struct Encoder {
		pub edges: Vec<(Ticks, bool)>,
		time: Ticks,
		last_bits: u8,
	}

	impl Encoder {
		/// Starts with a falling edge at `time`.
		pub fn new(time: Ticks) -> Self {
			Self { edges: vec![(time, false)], time, last_bits: 3 }
		}

		/// Emits a sync low phase followed by the falling edge that starts a frame.
		pub fn sync(&mut self) -> &mut Self {
			self.edge(2000, true);
			self.edge(400, false);
			self.last_bits = 3;
			self
		}

		/// Emits one symbol carrying `bits`.
		pub fn bits(&mut self, bits: u8) -> &mut Self {
			let symbol = (bits + 3 - self.last_bits) as u16;
			self.last_bits = bits;
			self.raw_symbol(SYMBOL_BASE_US + SYMBOL_STEP_US * symbol)
		}

		/// Emits a falling-to-falling interval of `width` µs.
		pub fn raw_symbol(&mut self, width: u16) -> &mut Self {
			self.edge(400, true);
			self.edge(width - 400, false);
			self
		}

		/// Emits a channel byte. The wire carries the complement of the decoded value.
		pub fn byte(&mut self, value: u8) -> &mut Self {
			let raw = !value;
			for shift in [6, 4, 2, 0] {
				self.bits((raw >> shift) & 3);
			}
			self.bits(checksum(raw))
		}

		pub fn frame(&mut self, values: &[u8; 8], trailer: u8) -> &mut Self {
			self.sync();
			for value in values {
				self.byte(*value);
			}
			self.bits(trailer >> 2).bits(trailer & 3)
		}

		fn edge(&mut self, delay: u16, rising_edge: bool) {
			self.time = self.time.wrapping_add(delay);
			self.edges.push((self.time, rising_edge));
		}
	}
}


#[cfg(test)]
mod tests {
	use super::encode::Encoder;
	use super::*;
	use crate::decoder::mock::{Event, EventLog};
	use crate::decoder::TIMEOUT_TICKS;
	use crate::timing::MicrosecondClock;

	type TestDecoder<'a> = PcmDecoder<MicrosecondClock, &'a EventLog>;

	fn feed<C: Clock, H: Hooks>(decoder: &PcmDecoder<C, H>, encoder: &Encoder) {
		for (time, rising_edge) in &encoder.edges {
			decoder.on_edge(*time, *rising_edge);
		}
	}

	#[test]
	fn classifies_symbol_widths() {
		type Pcm = PcmDecoder<MicrosecondClock>;
		for symbol in 0..7u16 {
			let width = SYMBOL_BASE_US + SYMBOL_STEP_US * symbol;
			assert_eq!(Pcm::symbol(width) as u16, symbol);
			assert_eq!(Pcm::symbol(width + 60) as u16, symbol);
			assert_eq!(Pcm::symbol(width - 60) as u16, symbol);
		}
		assert_eq!(Pcm::symbol(700), 7);
		assert_eq!(Pcm::symbol(809), 7);
		assert_eq!(Pcm::symbol(810), 0);
		assert_eq!(Pcm::symbol(1649), 5);
		assert_eq!(Pcm::symbol(1650), 6);
		assert_eq!(Pcm::symbol(4000), 6);
	}

	#[test]
	fn checksum_of_known_bytes() {
		assert_eq!(checksum(0x00), 3);
		assert_eq!(checksum(0xFF), 3);
		assert_eq!(checksum(0x01), 2);
		assert_eq!(checksum(0x80), 1);
	}

	#[test]
	fn decodes_an_eight_channel_frame() {
		let log = EventLog::default();
		let decoder = TestDecoder::new(&log);
		let values = [0x00, 0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xFF];

		feed(&decoder, Encoder::new(0).frame(&values, TRAILER_8_CHANNELS));

		assert!(log.errors().is_empty());
		assert!(decoder.is_receiving());
		assert_eq!(decoder.channel_count(), 8);
		for (channel, value) in values.iter().enumerate() {
			assert_eq!(decoder.channel_data(channel as u8), *value);
		}
		assert_eq!(decoder.channel_pulse_width(0), 1050);
		assert_eq!(decoder.channel_pulse_width(7), 1050 + 138 * 255 / 32);
		assert_eq!(decoder.channel_data(8), NEUTRAL_DATA);
		assert_eq!(decoder.channel_pulse_width(8), 0);
		assert_eq!(decoder.state(), DecoderState::WaitingForSync);
	}

	#[test]
	fn ten_channel_frame_keeps_channels_seven_and_eight() {
		let log = EventLog::default();
		let decoder = TestDecoder::new(&log);

		let mut encoder = Encoder::new(0);
		encoder.frame(&[1, 2, 3, 4, 5, 6, 7, 8], TRAILER_8_CHANNELS);
		encoder.frame(&[11, 12, 13, 14, 15, 16, 19, 20], TRAILER_10_CHANNELS);
		feed(&decoder, &encoder);

		assert!(log.errors().is_empty());
		assert_eq!(decoder.channel_count(), 10);
		let decoded: [u8; 10] = core::array::from_fn(|channel| decoder.channel_data(channel as u8));
		assert_eq!(decoded, [11, 12, 13, 14, 15, 16, 7, 8, 19, 20]);
	}

	#[test]
	fn checksum_mismatch_drops_the_frame() {
		let log = EventLog::default();
		let decoder = TestDecoder::new(&log);

		let mut encoder = Encoder::new(0);
		encoder.sync();
		// Byte 0x00 is sent as 0xFF: data bits 3,3,3,3 then checksum 3. Send checksum 2.
		encoder.bits(3).bits(3).bits(3).bits(3).bits(2);
		feed(&decoder, &encoder);

		assert_eq!(log.errors(), [DecodeError::Checksum]);
		assert_eq!(decoder.state(), DecoderState::WaitingForSync);
		assert!(!decoder.is_receiving());
		assert_eq!(decoder.bit_count.load(Ordering::Relaxed), 0);
		assert_eq!(decoder.current_data.load(Ordering::Relaxed), 0);
	}

	#[test]
	fn impossible_symbol_desyncs() {
		let log = EventLog::default();
		let decoder = TestDecoder::new(&log);

		let mut encoder = Encoder::new(0);
		encoder.sync();
		// After a start the previous bits are 3, so only symbols 0 to 3 are valid.
		encoder.raw_symbol(SYMBOL_BASE_US + SYMBOL_STEP_US * 5);
		feed(&decoder, &encoder);

		assert_eq!(log.errors(), [DecodeError::Desync]);
		assert_eq!(decoder.state(), DecoderState::WaitingForSync);
	}

	#[test]
	fn desync_mid_frame_clears_the_counters() {
		let decoder = PcmDecoder::<MicrosecondClock>::new(NoHooks);

		let mut encoder = Encoder::new(0);
		encoder.sync();
		encoder.byte(0x12).byte(0x34).bits(1);
		encoder.raw_symbol(SYMBOL_BASE_US + SYMBOL_STEP_US * 6);
		feed(&decoder, &encoder);

		assert_eq!(decoder.state(), DecoderState::WaitingForSync);
		assert_eq!(decoder.current_channel.load(Ordering::Relaxed), 0);
		assert_eq!(decoder.bit_count.load(Ordering::Relaxed), 0);
		assert_eq!(decoder.current_data.load(Ordering::Relaxed), 0);
	}

	#[test]
	fn times_out_without_frames() {
		let decoder = PcmDecoder::<MicrosecondClock>::new(NoHooks);

		feed(&decoder, Encoder::new(0).frame(&[0x80; 8], TRAILER_8_CHANNELS));
		assert!(decoder.is_receiving());
		assert_eq!(decoder.channel_count(), 8);

		for _ in 0..TIMEOUT_TICKS {
			decoder.run_task();
		}
		assert!(decoder.is_receiving());

		decoder.run_task();
		assert!(!decoder.is_receiving());
		assert!(!decoder.has_new_data());
		assert_eq!(decoder.channel_count(), 0);
		assert_eq!(decoder.channel_pulse_width(0), 0);
		assert_eq!(decoder.channel_data(0), NEUTRAL_DATA);
		assert_eq!(decoder.state(), DecoderState::WaitingForSync);
	}

	#[test]
	fn unknown_trailer_is_a_framing_error() {
		let log = EventLog::default();
		let decoder = TestDecoder::new(&log);

		feed(&decoder, Encoder::new(0).frame(&[0x80; 8], 0x5));

		assert_eq!(log.errors(), [DecodeError::Framing]);
		assert_eq!(decoder.channel_count(), 0);
		assert!(!log.events().contains(&Event::Frame(SignalSource::Pcm, 8)));
	}

	#[test]
	fn recovers_after_an_error() {
		let log = EventLog::default();
		let decoder = TestDecoder::new(&log);

		let mut encoder = Encoder::new(0);
		encoder.sync();
		encoder.raw_symbol(SYMBOL_BASE_US + SYMBOL_STEP_US * 6);
		encoder.frame(&[0x40; 8], TRAILER_8_CHANNELS);
		feed(&decoder, &encoder);

		assert_eq!(log.errors(), [DecodeError::Desync]);
		assert_eq!(log.frames(), 1);
		assert_eq!(decoder.channel_data(3), 0x40);
	}
}
