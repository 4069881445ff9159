//! Multiplex SRXL decoder.
//!
//! SRXL frames arrive over a 115200 baud UART. A frame is a header byte, 12 or 16 big-endian
//! channel words and a CRC-16. Frames are delimited by a pause of at least 5 ms, detected with an
//! alarm that every received byte pushes back.

use core::marker::PhantomData;
use core::sync::atomic::{AtomicU8, Ordering};

use crc::{Crc, CRC_16_XMODEM};

use crate::bank::{BankRef, FrameBanks};
use crate::decoder::{AtomicState, DecodeError, Decoder, DecoderState, FrameStatus, Hooks, NoHooks, SignalSource};
use crate::timing::{us_to_ticks, Alarm, Clock, Ticks};


pub const MAX_CHANNEL_COUNT: usize = 16;
pub const BAUDRATE: u32 = 115_200;

/// Header of a frame with 12 channels.
pub const HEADER_V1: u8 = 0xA1;
/// Header of a frame with 16 channels.
pub const HEADER_V2: u8 = 0xA2;

/// Bytes in a frame carrying `channels` channels.
pub const fn frame_len(channels: usize) -> usize {
	1 + channels * 2 + 2
}

pub const MAX_FRAME_LEN: usize = frame_len(MAX_CHANNEL_COUNT);

const SYNC_PAUSE_US: u16 = 5000;


/// CRC-16 with polynomial 0x1021 and zero initial value, sent big endian after the payload.
pub const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);


/// Converts a channel word to a pulse width in microseconds. Only the low 12 bits are used.
pub fn data_to_us(value: u16) -> u16 {
	800 + (((value & 0xFFF) as u32 * 1400 + 0x800) / 0x1000) as u16
}


pub struct SrxlDecoder<C: Clock, H: Hooks = NoHooks> {
	frames: FrameBanks<MAX_FRAME_LEN>,
	status: FrameStatus,
	state: AtomicState,
	bytes_received: AtomicU8,
	hooks: H,
	_clock: PhantomData<C>,
}

impl<C: Clock, H: Hooks> SrxlDecoder<C, H> {
	const SYNC_PAUSE: Ticks = us_to_ticks(C::HZ, SYNC_PAUSE_US);

	pub const fn new(hooks: H) -> Self {
		Self {
			frames: FrameBanks::new(),
			status: FrameStatus::new(),
			state: AtomicState::new(),
			bytes_received: AtomicU8::new(0),
			hooks,
			_clock: PhantomData,
		}
	}

	pub fn state(&self) -> DecoderState {
		self.state.load()
	}

	/// Handles a byte received by the UART at `time`.
	pub fn on_byte(&self, byte: u8, time: Ticks, alarm: &mut impl Alarm) {
		alarm.schedule_at(time.wrapping_add(Self::SYNC_PAUSE));

		let index = critical_section::with(|_| {
			if self.state.load() == DecoderState::SyncDetected {
				self.state.store(DecoderState::ReceivingData);
				self.bytes_received.store(0, Ordering::Relaxed);
			}

			if self.state.load() != DecoderState::ReceivingData {
				return None;
			}

			let index = self.bytes_received.load(Ordering::Relaxed);
			if index as usize >= MAX_FRAME_LEN {
				return None;
			}
			self.bytes_received.store(index + 1, Ordering::Relaxed);
			Some(index as usize)
		});

		let Some(index) = index else {
			return;
		};

		let frame = self.frames.active();
		frame.set(index, byte);

		let length = index + 1;
		let channel_count = match frame.get(0) {
			Some(HEADER_V1) if length == frame_len(12) => 12,
			Some(HEADER_V2) if length == frame_len(16) => 16,
			_ => return,
		};

		self.process_frame(frame, length, channel_count);
	}

	/// Handles the alarm armed by [`SrxlDecoder::on_byte`]: the line has been idle for a sync pause.
	pub fn on_sync_timeout(&self) {
		self.state.store(DecoderState::SyncDetected);
		self.hooks.on_sync_detected(SignalSource::Srxl);
	}

	/// The 12-bit channel word from the last complete frame, or `None` if absent.
	pub fn channel_data(&self, channel: u8) -> Option<u16> {
		if channel >= self.status.channel_count() {
			return None;
		}

		let frame = self.frames.stable();
		let index = 1 + channel as usize * 2;

		critical_section::with(|_| {
			let high = frame.get(index)?;
			let low = frame.get(index + 1)?;
			Some(u16::from_be_bytes([high, low]) & 0xFFF)
		})
	}

	fn process_frame(&self, frame: BankRef<'_, AtomicU8, MAX_FRAME_LEN>, length: usize, channel_count: u8) {
		let payload = length - 2;
		let received = u16::from_be_bytes([frame.get(payload).unwrap_or(0), frame.get(payload + 1).unwrap_or(0)]);
		let mut digest = CRC16.digest();
		for byte in (0..payload).filter_map(|index| frame.get(index)) {
			digest.update(&[byte]);
		}
		let computed = digest.finalize();

		if computed == received {
			critical_section::with(|_| {
				self.frames.flip();
				self.status.publish(channel_count);
				self.state.store(DecoderState::SyncDetected);
			});
			self.hooks.on_frame_received(SignalSource::Srxl, channel_count);
		}
		else {
			critical_section::with(|_| {
				self.state.store(DecoderState::WaitingForSync);
				self.bytes_received.store(0, Ordering::Relaxed);
			});
			self.hooks.on_error(SignalSource::Srxl, DecodeError::Crc);
		}
	}
}

impl<C: Clock, H: Hooks> Decoder for SrxlDecoder<C, H> {
	fn source(&self) -> SignalSource {
		SignalSource::Srxl
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
		self.channel_data(channel).map_or(0, data_to_us)
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
			self.bytes_received.store(0, Ordering::Relaxed);
			self.frames.reset();
			self.status.reset();
		});
	}
}


/// Builds frames the way a receiver would send them.
#[cfg(test)]
pub(crate) mod encode {
	use std::vec::Vec;

	use super::*;

	pub fn frame(header: u8, words: &[u16]) -> Vec<u8> {
		let mut bytes = vec![header];
		for word in words {
			bytes.extend_from_slice(&word.to_be_bytes());
		}
		let crc = CRC16.checksum(&bytes);
		bytes.extend_from_slice(&crc.to_be_bytes());
		bytes
	}
}
