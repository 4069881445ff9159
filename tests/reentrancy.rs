//! An edge interrupt preempting the frame close of the previous edge.

use std::sync::atomic::{AtomicBool, Ordering};

use pico_rcjoy::*;


/// Fires one nested edge from inside the first frame boundary notification.
struct NestedEdge;

static NESTED: AtomicBool = AtomicBool::new(false);
static PPM: PpmDecoder<MicrosecondClock, NestedEdge> = PpmDecoder::new(NestedEdge);

const CLOSING_EDGE: Ticks = 30_000;
const NESTED_WIDTH: Ticks = 1200;

struct NoAlarm;

impl Alarm for NoAlarm {
	fn schedule_at(&mut self, _at: Ticks) {}
}

impl Hooks for NestedEdge {
	fn on_frame_received(&self, _source: SignalSource, _channel_count: u8) {
		if !NESTED.swap(true, Ordering::SeqCst) {
			PPM.on_edge(CLOSING_EDGE + NESTED_WIDTH, &mut NoAlarm);
		}
	}
}


#[test]
fn edge_during_frame_close_starts_the_next_frame() {
	let mut time: Ticks = 10_000;

	PPM.on_sync_timeout();
	PPM.on_edge(time, &mut NoAlarm);
	for _ in 0..5 {
		time += 1500;
		PPM.on_edge(time, &mut NoAlarm);
	}

	// The long gap closes the frame and the hook preempts with the first channel of the next.
	PPM.on_edge(CLOSING_EDGE, &mut NoAlarm);

	assert!(NESTED.load(Ordering::SeqCst));
	assert_eq!(PPM.channel_count(), 5);
	assert_eq!(PPM.channel_pulse_width(0), 1500);
	assert_eq!(PPM.state(), DecoderState::ReceivingData);

	time = CLOSING_EDGE + NESTED_WIDTH;
	for width in [1300, 1400, 1500] {
		time += width;
		PPM.on_edge(time, &mut NoAlarm);
	}
	PPM.on_sync_timeout();

	assert_eq!(PPM.channel_count(), 4);
	assert_eq!(
		(0..4).map(|channel| PPM.channel_pulse_width(channel)).collect::<Vec<_>>(),
		[1200, 1300, 1400, 1500]
	);
}
