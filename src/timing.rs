//! Tick arithmetic and the hardware timing seams used by the decoders.

/// A 16-bit timestamp of the free-running capture timer. Wraps around.
pub type Ticks = u16;


/// Converts between timer ticks and microseconds.
///
/// Implementations are zero-sized policy types. The decoders are generic over them, so every
/// conversion against a constant folds at compile time.
pub trait Clock {
	/// Timer frequency in ticks per second.
	const HZ: u32;

	/// Converts a tick count to microseconds.
	#[inline]
	fn ticks_to_us(ticks: Ticks) -> u16 {
		ticks_to_us(Self::HZ, ticks)
	}

	/// Converts microseconds to a tick count.
	#[inline]
	fn us_to_ticks(us: u16) -> Ticks {
		us_to_ticks(Self::HZ, us)
	}
}


/// A timer running at `RATE` ticks per second.
///
/// `RATE` must be a multiple of 100 and below 6.5 MHz so the intermediate products fit in a
/// `u32`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TickRate<const RATE: u32>;

impl<const RATE: u32> Clock for TickRate<RATE> {
	const HZ: u32 = RATE;
}

/// The RP2040 system timer, one tick per microsecond.
pub type MicrosecondClock = TickRate<1_000_000>;


/// Converts `ticks` of a `hz` timer to microseconds.
pub const fn ticks_to_us(hz: u32, ticks: Ticks) -> u16 {
	(ticks as u32 * 10_000 / (hz / 100)) as u16
}

/// Converts `us` microseconds to ticks of a `hz` timer.
pub const fn us_to_ticks(hz: u32, us: u16) -> Ticks {
	(us as u32 * (hz / 100) / 10_000) as Ticks
}


/// A one-shot hardware alarm the decoders re-arm to detect sync pauses.
pub trait Alarm {
	/// Arms the alarm to fire at the absolute tick `at`, replacing any pending deadline.
	fn schedule_at(&mut self, at: Ticks);
}


/// Returns the number of ticks from `since` to `now`, accounting for wraparound.
#[inline]
pub fn elapsed(since: Ticks, now: Ticks) -> Ticks {
	now.wrapping_sub(since)
}
