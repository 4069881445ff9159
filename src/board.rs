//! Raspberry Pi Pico glue: signal capture, hardware alarms, SRXL UART and the flash store.

use rp_pico as bsp;

use bsp::hal;
use hal::gpio;
use hal::pac;
use hal::uart;

use core::cell::RefCell;
use core::convert::Infallible;

use critical_section::Mutex;

/// These are traits for handling digital pin states.
use embedded_hal::digital::InputPin;

/// Represents a duration in microseconds.
use hal::fugit::MicrosDurationU32;

/// The HAL's alarm interface, distinct from the decoders' [`Alarm`].
use hal::timer::Alarm as HalAlarm;

use crate::*;


/// Capacity of the 2 MB flash on the Pico.
pub const FLASH_SIZE: u32 = 2 * 1024 * 1024;
/// The configuration lives in the last sector of the flash.
pub const CONFIG_FLASH_OFFSET: u32 = FLASH_SIZE - FLASH_SECTOR_SIZE;
const FLASH_SECTOR_SIZE: u32 = 4096;
const FLASH_PAGE_SIZE: usize = 256;
const FLASH_BLOCK_SIZE: u32 = 1 << 16;
const FLASH_BLOCK_ERASE_CMD: u8 = 0xD8;
const XIP_BASE: u32 = 0x1000_0000;


/// Type alias for the PPM/PCM signal input, GPIO2.
pub type SignalPin = gpio::Pin<gpio::bank0::Gpio2, gpio::FunctionSioInput, gpio::PullUp>;
/// Type alias for the UART0 pins, TX on GPIO0 and RX on GPIO1.
pub type UartPins = (
	gpio::Pin<gpio::bank0::Gpio0, gpio::FunctionUart, gpio::PullDown>,
	gpio::Pin<gpio::bank0::Gpio1, gpio::FunctionUart, gpio::PullDown>,
);
/// Type alias for the SRXL UART.
pub type SrxlUart = uart::UartPeripheral<uart::Enabled, pac::UART0, UartPins>;


/// Low 16 bits of the free-running 1 MHz system timer.
pub fn timestamp() -> Ticks {
	// SAFETY: TIMERAWL is read-only and has no read side effects.
	let timer = unsafe { &*pac::TIMER::ptr() };
	timer.timerawl().read().bits() as Ticks
}


/// A hardware alarm shared between the interrupt that arms it and the one it raises.
pub type SharedAlarm<A> = Mutex<RefCell<Option<HardwareAlarm<A>>>>;

/// Wraps a HAL alarm so the decoders can arm it at an absolute tick.
pub struct HardwareAlarm<A> {
	alarm: A,
}

impl<A: HalAlarm> HardwareAlarm<A> {
	pub fn new(mut alarm: A) -> Self {
		alarm.enable_interrupt();
		Self { alarm }
	}

	/// Acknowledges the alarm interrupt.
	pub fn clear_interrupt(&mut self) {
		self.alarm.clear_interrupt();
	}

	/// Arms the alarm `delay_us` from now.
	pub fn schedule_in(&mut self, delay_us: u32) {
		if self.alarm.schedule(MicrosDurationU32::micros(delay_us.max(1))).is_err() {
			log_warn!("Alarm schedule rejected");
		}
	}
}

impl<A: HalAlarm> Alarm for HardwareAlarm<A> {
	fn schedule_at(&mut self, at: Ticks) {
		self.schedule_in(elapsed(timestamp(), at) as u32);
	}
}

/// Arms a [`SharedAlarm`] from an interrupt handler, locking only around the register write.
pub struct AlarmHandle<A: 'static>(pub &'static SharedAlarm<A>);

impl<A: HalAlarm> Alarm for AlarmHandle<A> {
	fn schedule_at(&mut self, at: Ticks) {
		critical_section::with(|cs| {
			if let Some(alarm) = self.0.borrow_ref_mut(cs).as_mut() {
				alarm.schedule_at(at);
			}
		});
	}
}


/// The PPM/PCM input, interrupting on both edges.
pub struct CaptureInput {
	pin: SignalPin,
}

impl CaptureInput {
	pub fn new(pin: SignalPin) -> Self {
		pin.set_interrupt_enabled(gpio::Interrupt::EdgeHigh, true);
		pin.set_interrupt_enabled(gpio::Interrupt::EdgeLow, true);
		Self { pin }
	}

	/// Acknowledges the pending edges and returns them oldest first, `true` for rising.
	pub fn take_edges(&mut self) -> [Option<bool>; 2] {
		let rising = self.pin.interrupt_status(gpio::Interrupt::EdgeHigh);
		let falling = self.pin.interrupt_status(gpio::Interrupt::EdgeLow);
		self.pin.clear_interrupt(gpio::Interrupt::EdgeHigh);
		self.pin.clear_interrupt(gpio::Interrupt::EdgeLow);

		match (rising, falling) {
			// Both latched: the current level tells which came last.
			(true, true) if self.pin.is_high().unwrap_or(false) => [Some(false), Some(true)],
			(true, true) => [Some(true), Some(false)],
			(true, false) => [Some(true), None],
			(false, true) => [Some(false), None],
			(false, false) => [None, None],
		}
	}
}


/// The SRXL receive side of UART0.
pub struct SrxlInput {
	uart: SrxlUart,
}

impl SrxlInput {
	pub fn new(mut uart: SrxlUart) -> Self {
		uart.enable_rx_interrupt();
		Self { uart }
	}

	/// Drains the receive FIFO into `buffer`. Returns the number of bytes read.
	pub fn read(&mut self, buffer: &mut [u8]) -> usize {
		match self.uart.read_raw(buffer) {
			Ok(count) => count,
			Err(_) => 0,
		}
	}
}


/// Hooks that log decoder activity.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingHooks;

impl Hooks for LoggingHooks {
	fn on_frame_received(&self, source: SignalSource, channel_count: u8) {
		log_debug!("{:?} frame, {} channels", source, channel_count);
	}

	fn on_error(&self, source: SignalSource, error: DecodeError) {
		log_debug!("{:?} frame dropped: {:?}", source, error);
	}
}


/// The configuration record in the last sector of the on-board flash.
pub struct FlashStore;

impl ConfigStore for FlashStore {
	type Error = Infallible;

	fn read_block(&mut self, block: &mut [u8; Configuration::SIZE]) -> Result<(), Self::Error> {
		let base = (XIP_BASE + CONFIG_FLASH_OFFSET) as *const u8;

		for (index, byte) in block.iter_mut().enumerate() {
			// SAFETY: the address lies within the memory mapped flash.
			*byte = unsafe { core::ptr::read_volatile(base.add(index)) };
		}

		Ok(())
	}

	fn write_block(&mut self, block: &[u8; Configuration::SIZE]) -> Result<(), Self::Error> {
		let mut page = [0xFFu8; FLASH_PAGE_SIZE];
		page[..block.len()].copy_from_slice(block);

		let functions = FlashFunctions::load();

		// SAFETY: interrupts are disabled and the sector holds nothing but the configuration.
		critical_section::with(|_| unsafe { program_sector(&functions, CONFIG_FLASH_OFFSET, &page) });

		log_info!("Configuration written to flash");
		Ok(())
	}
}


/// Boot ROM flash routines, looked up while XIP is still available.
struct FlashFunctions {
	connect_internal_flash: unsafe extern "C" fn(),
	flash_exit_xip: unsafe extern "C" fn(),
	flash_range_erase: unsafe extern "C" fn(u32, usize, u32, u8),
	flash_range_program: unsafe extern "C" fn(u32, *const u8, usize),
	flash_flush_cache: unsafe extern "C" fn(),
	flash_enter_cmd_xip: unsafe extern "C" fn(),
}

impl FlashFunctions {
	fn load() -> Self {
		use hal::rom_data;

		Self {
			connect_internal_flash: rom_data::connect_internal_flash::ptr(),
			flash_exit_xip: rom_data::flash_exit_xip::ptr(),
			flash_range_erase: rom_data::flash_range_erase::ptr(),
			flash_range_program: rom_data::flash_range_program::ptr(),
			flash_flush_cache: rom_data::flash_flush_cache::ptr(),
			flash_enter_cmd_xip: rom_data::flash_enter_cmd_xip::ptr(),
		}
	}
}

/// Erases the sector at `offset` and programs `page` at its start.
///
/// Runs from RAM because flash is not readable while it is being written.
#[inline(never)]
#[link_section = ".data.ram_func"]
unsafe fn program_sector(functions: &FlashFunctions, offset: u32, page: &[u8; FLASH_PAGE_SIZE]) {
	(functions.connect_internal_flash)();
	(functions.flash_exit_xip)();
	(functions.flash_range_erase)(offset, FLASH_SECTOR_SIZE as usize, FLASH_BLOCK_SIZE, FLASH_BLOCK_ERASE_CMD);
	(functions.flash_range_program)(offset, page.as_ptr(), page.len());
	(functions.flash_flush_cache)();
	(functions.flash_enter_cmd_xip)();
}
