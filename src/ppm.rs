//! PPM (pulse position modulation) decoder.
//!
//! A PPM frame is a train of pulses whose rising edges are separated by the channel pulse
//! widths, followed by a sync pause longer than any channel. The decoder timestamps rising edges
//! and arms an alarm `min_sync_width` after each one. When the alarm fires before the next edge,
//! the pause is the frame boundary.

use core::marker::PhantomData;
use core::sync::atomic::{AtomicU16, AtomicU8, Ordering};

use crate::bank::{BankRef, ChannelBanks};
use crate::decoder::{AtomicState, Decoder, DecoderState, FrameStatus, Hooks, NoHooks, SignalSource};
use crate::timing::{elapsed, us_to_ticks, Alarm, Clock, Ticks};


/// Channels beyond this count are ignored.
pub const MAX_CHANNEL_COUNT: usize = 9;
/// Frames with fewer channels are discarded.
pub const MIN_CHANNEL_COUNT: u8 = 4;
/// Sync pause used until a configuration is applied.
pub const DEFAULT_SYNC_WIDTH_US: u16 = 3500;


/// Outcome of a captured edge, acted on outside the critical section.
enum Edge<'a> {
	Ignored,
	/// A channel width for the bank that was active when the slot was claimed.
	Channel(BankRef<'a, AtomicU16, MAX_CHANNEL_COUNT>, u8, Ticks),
	FrameClosed(Option<u8>),
}


pub struct PpmDecoder<C: Clock, H: Hooks = NoHooks> {
	banks: ChannelBanks<MAX_CHANNEL_COUNT>,
	status: FrameStatus,
	state: AtomicState,
	min_sync_width: AtomicU16,
	last_edge: AtomicU16,
	current_channel: AtomicU8,
	hooks: H,
	_clock: PhantomData<C>,
}

impl<C: Clock, H: Hooks> PpmDecoder<C, H> {
	pub const fn new(hooks: H) -> Self {
		Self {
			banks: ChannelBanks::new(),
			status: FrameStatus::new(),
			state: AtomicState::new(),
			min_sync_width: AtomicU16::new(us_to_ticks(C::HZ, DEFAULT_SYNC_WIDTH_US)),
			last_edge: AtomicU16::new(0),
			current_channel: AtomicU8::new(0),
			hooks,
			_clock: PhantomData,
		}
	}

	/// Sets the shortest pause recognised as a frame boundary.
	pub fn set_min_sync_width(&self, us: u16) {
		self.min_sync_width.store(C::us_to_ticks(us), Ordering::Relaxed);
	}

	/// The shortest pause recognised as a frame boundary, in microseconds.
	pub fn min_sync_width(&self) -> u16 {
		C::ticks_to_us(self.min_sync_width.load(Ordering::Relaxed))
	}

	pub fn state(&self) -> DecoderState {
		self.state.load()
	}

	/// Handles a rising edge captured at `time`.
	///
	/// Safe to call from an interrupt that preempts another call of itself.
	pub fn on_edge(&self, time: Ticks, alarm: &mut impl Alarm) {
		alarm.schedule_at(time.wrapping_add(self.min_sync_width.load(Ordering::Relaxed)));

		let edge = self.claim_edge(time);
		self.complete_edge(edge);
	}

	/// Advances the state machine for an edge at `time`.
	fn claim_edge(&self, time: Ticks) -> Edge<'_> {
		let min_sync_width = self.min_sync_width.load(Ordering::Relaxed);

		critical_section::with(|_| {
			let width = elapsed(self.last_edge.load(Ordering::Relaxed), time);
			self.last_edge.store(time, Ordering::Relaxed);

			match self.state.load() {
				DecoderState::WaitingForSync => {
					if width >= min_sync_width {
						self.start_frame();
					}
					Edge::Ignored
				}
				DecoderState::SyncDetected => {
					self.start_frame();
					Edge::Ignored
				}
				DecoderState::ReceivingData if width >= min_sync_width => {
					let closed = self.close_frame();
					self.start_frame();
					Edge::FrameClosed(closed)
				}
				DecoderState::ReceivingData => {
					let channel = self.current_channel.load(Ordering::Relaxed);
					if (channel as usize) < MAX_CHANNEL_COUNT {
						self.current_channel.store(channel + 1, Ordering::Relaxed);
						Edge::Channel(self.banks.active(), channel, width)
					}
					else {
						Edge::Ignored
					}
				}
			}
		})
	}

	/// Stores the channel width or raises the frame notifications. Runs with interrupts enabled.
	fn complete_edge(&self, edge: Edge<'_>) {
		match edge {
			Edge::Channel(bank, channel, width) => bank.set(channel as usize, width),
			Edge::FrameClosed(channel_count) => self.notify(channel_count),
			Edge::Ignored => {}
		}
	}

	/// Handles the alarm armed by [`PpmDecoder::on_edge`]: the sync pause has elapsed.
	pub fn on_sync_timeout(&self) {
		let channel_count = critical_section::with(|_| self.close_frame());
		self.notify(channel_count);
	}

	/// Width in ticks of `channel` from the last complete frame, or 0 if absent.
	pub fn channel_ticks(&self, channel: u8) -> Ticks {
		if channel >= self.status.channel_count() {
			return 0;
		}

		self.banks.stable().get(channel as usize).unwrap_or(0)
	}

	fn start_frame(&self) {
		self.current_channel.store(0, Ordering::Relaxed);
		self.state.store(DecoderState::ReceivingData);
	}

	/// Ends the frame in progress. Returns its channel count if it was published.
	///
	/// Must run inside a critical section.
	fn close_frame(&self) -> Option<u8> {
		let channel_count = self.current_channel.load(Ordering::Relaxed);
		self.current_channel.store(0, Ordering::Relaxed);
		self.state.store(DecoderState::SyncDetected);

		if channel_count < MIN_CHANNEL_COUNT {
			return None;
		}

		self.banks.flip();
		self.status.publish(channel_count);
		Some(channel_count)
	}

	fn notify(&self, channel_count: Option<u8>) {
		self.hooks.on_sync_detected(SignalSource::Ppm);
		if let Some(channel_count) = channel_count {
			self.hooks.on_frame_received(SignalSource::Ppm, channel_count);
		}
	}
}

impl<C: Clock, H: Hooks> Decoder for PpmDecoder<C, H> {
	fn source(&self) -> SignalSource {
		SignalSource::Ppm
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
		match self.channel_ticks(channel) {
			0 => 0,
			ticks => C::ticks_to_us(ticks),
		}
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
			self.state.store(DecoderState::WaitingForSync);
			self.current_channel.store(0, Ordering::Relaxed);
			self.banks.reset();
			self.status.reset();
		});
	}
}


#[cfg(test)]
mod tests {
	use super::*;
	use crate::decoder::mock::{Event, EventLog, RecordingAlarm};
	use crate::decoder::TIMEOUT_TICKS;
	use crate::timing::{MicrosecondClock, TickRate};

	type TestDecoder<'a> = PpmDecoder<MicrosecondClock, &'a EventLog>;

	/// Feeds one frame of `widths` starting at `time`, followed by a fired sync alarm.
	/// Returns the time of the last edge.
	fn feed_frame<C: Clock, H: Hooks>(decoder: &PpmDecoder<C, H>, alarm: &mut RecordingAlarm, mut time: Ticks, widths: &[Ticks]) -> Ticks {
		decoder.on_edge(time, alarm);
		for width in widths {
			time = time.wrapping_add(*width);
			decoder.on_edge(time, alarm);
		}
		decoder.on_sync_timeout();
		time
	}

	#[test]
	fn decodes_a_frame_after_a_sync_pause() {
		let log = EventLog::default();
		let decoder = TestDecoder::new(&log);
		let mut alarm = RecordingAlarm::default();

		decoder.on_sync_timeout();
		let widths = [1000, 1100, 1200, 1300, 1400, 1500, 1600, 1700];
		feed_frame(&decoder, &mut alarm, 10_000, &widths);

		assert!(decoder.is_receiving());
		assert!(decoder.has_new_data());
		assert_eq!(decoder.channel_count(), 8);
		for (channel, width) in widths.iter().enumerate() {
			assert_eq!(decoder.channel_pulse_width(channel as u8), *width);
		}
		assert_eq!(decoder.channel_pulse_width(8), 0);
		assert_eq!(log.frames(), 1);
	}

	#[test]
	fn arms_the_alarm_after_every_edge() {
		let decoder = PpmDecoder::<MicrosecondClock>::new(NoHooks);
		let mut alarm = RecordingAlarm::default();

		decoder.set_min_sync_width(4000);
		decoder.on_edge(0xFF00, &mut alarm);
		decoder.on_edge(0x0100, &mut alarm);

		assert_eq!(alarm.deadlines, [0xFF00u16.wrapping_add(4000), 0x0100 + 4000]);
		assert_eq!(decoder.min_sync_width(), 4000);
	}

	#[test]
	fn frames_below_four_channels_are_dropped() {
		let log = EventLog::default();
		let decoder = TestDecoder::new(&log);
		let mut alarm = RecordingAlarm::default();

		decoder.on_sync_timeout();
		feed_frame(&decoder, &mut alarm, 0, &[1500, 1500, 1500]);
		assert!(!decoder.is_receiving());
		assert_eq!(decoder.channel_count(), 0);

		feed_frame(&decoder, &mut alarm, 20_000, &[1500, 1500, 1500, 1500]);
		assert!(decoder.is_receiving());
		assert_eq!(decoder.channel_count(), 4);
		assert_eq!(log.events().last(), Some(&Event::Frame(SignalSource::Ppm, 4)));
	}

	#[test]
	fn a_long_gap_closes_the_frame_without_the_alarm() {
		let decoder = PpmDecoder::<MicrosecondClock>::new(NoHooks);
		let mut alarm = RecordingAlarm::default();

		decoder.on_sync_timeout();
		let mut time = 0;
		decoder.on_edge(time, &mut alarm);
		for _ in 0..5 {
			time += 1200;
			decoder.on_edge(time, &mut alarm);
		}
		time += 5000;
		decoder.on_edge(time, &mut alarm);

		assert_eq!(decoder.channel_count(), 5);
		assert_eq!(decoder.state(), DecoderState::ReceivingData);
	}

	#[test]
	fn width_lands_in_the_bank_claimed_before_a_frame_close() {
		let decoder = PpmDecoder::<MicrosecondClock>::new(NoHooks);
		let mut alarm = RecordingAlarm::default();

		decoder.on_sync_timeout();
		let mut time = 0;
		decoder.on_edge(time, &mut alarm);
		for _ in 0..3 {
			time += 1500;
			decoder.on_edge(time, &mut alarm);
		}

		// The sync alarm preempts between the slot claim and the bank write of the fourth channel.
		let edge = decoder.claim_edge(time + 1800);
		decoder.on_sync_timeout();
		decoder.complete_edge(edge);

		assert_eq!(decoder.channel_count(), 4);
		assert_eq!(decoder.channel_pulse_width(3), 1800);
	}

	#[test]
	fn extra_channels_are_ignored() {
		let decoder = PpmDecoder::<MicrosecondClock>::new(NoHooks);
		let mut alarm = RecordingAlarm::default();

		decoder.on_sync_timeout();
		feed_frame(&decoder, &mut alarm, 0, &[1000; 12]);
		assert_eq!(decoder.channel_count() as usize, MAX_CHANNEL_COUNT);
	}

	#[test]
	fn waits_for_a_sync_pause_before_decoding() {
		let decoder = PpmDecoder::<MicrosecondClock>::new(NoHooks);
		let mut alarm = RecordingAlarm::default();

		decoder.on_edge(0, &mut alarm);
		decoder.on_edge(1000, &mut alarm);
		assert_eq!(decoder.state(), DecoderState::WaitingForSync);

		decoder.on_edge(5000, &mut alarm);
		assert_eq!(decoder.state(), DecoderState::ReceivingData);
	}

	#[test]
	fn times_out_without_frames() {
		let decoder = PpmDecoder::<MicrosecondClock>::new(NoHooks);
		let mut alarm = RecordingAlarm::default();

		decoder.on_sync_timeout();
		feed_frame(&decoder, &mut alarm, 0, &[1500; 6]);
		assert!(decoder.is_receiving());

		for _ in 0..=TIMEOUT_TICKS {
			decoder.run_task();
		}
		assert!(!decoder.is_receiving());
		assert_eq!(decoder.channel_count(), 0);
		assert_eq!(decoder.state(), DecoderState::WaitingForSync);
	}

	#[test]
	fn a_frame_at_the_deadline_restarts_the_timeout() {
		let decoder = PpmDecoder::<MicrosecondClock>::new(NoHooks);
		let mut alarm = RecordingAlarm::default();

		decoder.on_sync_timeout();
		let time = feed_frame(&decoder, &mut alarm, 0, &[1500; 6]);
		for _ in 0..TIMEOUT_TICKS {
			decoder.run_task();
		}

		// The next tick would expire the decoder, but a frame is published first.
		feed_frame(&decoder, &mut alarm, time.wrapping_add(5000), &[1600; 6]);
		decoder.run_task();

		assert!(decoder.is_receiving());
		assert_eq!(decoder.channel_count(), 6);
		assert_eq!(decoder.channel_pulse_width(0), 1600);
	}

	#[test]
	fn converts_prescaled_ticks() {
		let decoder = PpmDecoder::<TickRate<1_382_400>>::new(NoHooks);
		let mut alarm = RecordingAlarm::default();

		assert_eq!(decoder.min_sync_width(), 3499);
		decoder.on_sync_timeout();
		feed_frame(&decoder, &mut alarm, 0, &[2074; 4]);
		assert_eq!(decoder.channel_ticks(0), 2074);
		assert_eq!(decoder.channel_pulse_width(0), 1500);
	}
}
