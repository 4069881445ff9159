#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use pico_rcjoy::srxl::{CRC16, HEADER_V1, HEADER_V2};
use pico_rcjoy::*;


/// An alarm that is never expected to fire on its own; tests call the timeout handlers directly.
#[derive(Default)]
pub struct ManualAlarm {
	pub last: Option<Ticks>,
	pub count: usize,
}

impl Alarm for ManualAlarm {
	fn schedule_at(&mut self, at: Ticks) {
		self.last = Some(at);
		self.count += 1;
	}
}


/// Counts hook notifications.
#[derive(Default)]
pub struct Counters {
	pub syncs: AtomicUsize,
	pub frames: AtomicUsize,
	pub errors: AtomicUsize,
}

impl Counters {
	pub fn frames(&self) -> usize {
		self.frames.load(Ordering::SeqCst)
	}

	pub fn errors(&self) -> usize {
		self.errors.load(Ordering::SeqCst)
	}
}

impl Hooks for &Counters {
	fn on_sync_detected(&self, _source: SignalSource) {
		self.syncs.fetch_add(1, Ordering::SeqCst);
	}

	fn on_frame_received(&self, _source: SignalSource, _channel_count: u8) {
		self.frames.fetch_add(1, Ordering::SeqCst);
	}

	fn on_error(&self, _source: SignalSource, _error: DecodeError) {
		self.errors.fetch_add(1, Ordering::SeqCst);
	}
}


/// Rising edges of a PPM frame starting at `start`, one per channel boundary.
pub fn ppm_edges(start: Ticks, widths: &[Ticks]) -> Vec<Ticks> {
	let mut edges = vec![start];
	let mut time = start;
	for width in widths {
		time = time.wrapping_add(*width);
		edges.push(time);
	}
	edges
}

/// Feeds a PPM frame through the capture path, between two fired sync alarms.
pub fn feed_ppm<C: Clock, H: Hooks>(decoders: &Decoders<C, H>, start: Ticks, widths: &[Ticks]) {
	let mut alarm = ManualAlarm::default();
	decoders.ppm.on_sync_timeout();
	for time in ppm_edges(start, widths) {
		decoders.on_capture(time, true, &mut alarm);
	}
	decoders.ppm.on_sync_timeout();
}

/// A well-formed SRXL frame carrying `words`.
pub fn srxl_frame(words: &[u16]) -> Vec<u8> {
	let header = if words.len() == 12 { HEADER_V1 } else { HEADER_V2 };
	let mut bytes = vec![header];
	for word in words {
		bytes.extend_from_slice(&word.to_be_bytes());
	}
	let crc = CRC16.checksum(&bytes);
	bytes.extend_from_slice(&crc.to_be_bytes());
	bytes
}

/// Feeds `bytes` to the SRXL decoder after a sync pause.
pub fn feed_srxl<C: Clock, H: Hooks>(decoders: &Decoders<C, H>, bytes: &[u8]) {
	let mut alarm = ManualAlarm::default();
	decoders.srxl.on_sync_timeout();
	for (index, byte) in bytes.iter().enumerate() {
		decoders.srxl.on_byte(*byte, (index * 87) as Ticks, &mut alarm);
	}
}
