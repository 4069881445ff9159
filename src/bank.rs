//! Double-buffered channel storage shared between interrupt handlers and the main loop.
//!
//! Each decoder owns two banks. The interrupt side writes the *active* bank while the main loop
//! reads the *stable* one, which holds the last complete frame. A single atomic index selects
//! which bank is which and is flipped only after a frame has been validated.
//!
//! Readers take a [`BankRef`] once and read every value of interest through it, so a flip in
//! the middle of a read sequence never mixes banks by index.

use core::sync::atomic::{AtomicU16, AtomicU8, Ordering};


/// An atomic storage cell usable as a bank slot.
///
/// Only plain loads and stores are required, which the Cortex-M0+ supports natively.
pub trait Slot {
	type Value: Copy;

	/// A zeroed slot, used to const-initialize the banks.
	const ZERO: Self;

	fn load(&self) -> Self::Value;
	fn store(&self, value: Self::Value);
}

impl Slot for AtomicU8 {
	type Value = u8;

	const ZERO: Self = AtomicU8::new(0);

	#[inline]
	fn load(&self) -> u8 {
		AtomicU8::load(self, Ordering::Relaxed)
	}

	#[inline]
	fn store(&self, value: u8) {
		AtomicU8::store(self, value, Ordering::Relaxed)
	}
}

impl Slot for AtomicU16 {
	type Value = u16;

	const ZERO: Self = AtomicU16::new(0);

	#[inline]
	fn load(&self) -> u16 {
		AtomicU16::load(self, Ordering::Relaxed)
	}

	#[inline]
	fn store(&self, value: u16) {
		AtomicU16::store(self, value, Ordering::Relaxed)
	}
}


/// Two banks of `N` slots plus the index of the active one.
pub struct Banks<S: Slot, const N: usize> {
	active: AtomicU8,
	slots: [[S; N]; 2],
}

/// Banks of 16-bit channel values (pulse widths in ticks or raw bytes).
pub type ChannelBanks<const N: usize> = Banks<AtomicU16, N>;
/// Banks of raw frame bytes.
pub type FrameBanks<const N: usize> = Banks<AtomicU8, N>;

impl<S: Slot, const N: usize> Banks<S, N> {
	pub const fn new() -> Self {
		Self {
			active: AtomicU8::new(0),
			slots: [const { [const { S::ZERO }; N] }; 2],
		}
	}

	/// The number of slots per bank.
	pub const fn capacity(&self) -> usize {
		N
	}

	/// The bank currently being written by the interrupt side.
	#[inline]
	pub fn active(&self) -> BankRef<'_, S, N> {
		BankRef { slots: &self.slots[self.active_index()] }
	}

	/// The bank holding the last complete frame.
	#[inline]
	pub fn stable(&self) -> BankRef<'_, S, N> {
		BankRef { slots: &self.slots[self.active_index() ^ 1] }
	}

	/// Publishes the active bank as the new stable bank.
	///
	/// Only the interrupt side calls this, so a load followed by a store is sufficient.
	#[inline]
	pub fn flip(&self) {
		let active = self.active.load(Ordering::Relaxed);
		self.active.store(active ^ 1, Ordering::Release);
	}

	/// Makes bank 0 active again. The slot contents are left untouched.
	pub fn reset(&self) {
		self.active.store(0, Ordering::Release);
	}

	#[inline]
	fn active_index(&self) -> usize {
		(self.active.load(Ordering::Acquire) & 1) as usize
	}
}

impl<S: Slot, const N: usize> Default for Banks<S, N> {
	fn default() -> Self {
		Self::new()
	}
}


/// A view of one bank, selected once.
pub struct BankRef<'a, S: Slot, const N: usize> {
	slots: &'a [S; N],
}

impl<S: Slot, const N: usize> Clone for BankRef<'_, S, N> {
	fn clone(&self) -> Self {
		*self
	}
}

impl<S: Slot, const N: usize> Copy for BankRef<'_, S, N> {}

impl<'a, S: Slot, const N: usize> BankRef<'a, S, N> {
	/// Reads a slot. Out-of-range indices read as `None`.
	#[inline]
	pub fn get(&self, index: usize) -> Option<S::Value> {
		self.slots.get(index).map(Slot::load)
	}

	/// Writes a slot. Out-of-range indices are ignored.
	#[inline]
	pub fn set(&self, index: usize, value: S::Value) {
		if let Some(slot) = self.slots.get(index) {
			slot.store(value);
		}
	}
}
