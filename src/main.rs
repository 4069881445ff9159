#![no_std]
#![no_main]

// Ensures that the program is halted on panic.
extern crate panic_halt;

#[cfg(feature = "defmt")]
use defmt_rtt as _;

use pico_rcjoy::*;
use pico_rcjoy::board::*;

// The "rp_pico" crate is a Board Support Package for the RP2040 Hardware Abstraction Layer.
// Whenever the "bsp" alias is used, it is directly referencing the rp_pico crate.
use rp_pico as bsp;

// The macro for the start-up function.
use bsp::entry;

// Shorter alias for the Peripheral Access Crate.
use bsp::hal::pac;

// Shorter alias for the Hardware Abstraction Layer.
use bsp::hal;
use hal::Clock;

use hal::fugit::{MicrosDurationU32, RateExtU32};
use hal::pac::interrupt;
use hal::timer::{Alarm0, Alarm1, Alarm2};
use hal::uart::{DataBits, StopBits, UartConfig, UartPeripheral};

use core::cell::RefCell;

use cortex_m::peripheral::NVIC;

use critical_section::Mutex;

use embedded_hal::digital::{OutputPin, StatefulOutputPin};

// USB Device support.
use usb_device::{class_prelude::*, prelude::*};

// USB HID support.
use usbd_hid::descriptor::SerializedDescriptor;
use usbd_hid::hid_class::HIDClass;


/// Period of the decoder housekeeping task.
const TASK_PERIOD_US: u32 = 1000;
/// The speed at which the joystick reports to the host.
const USB_POLL_RATE_MS: u8 = 1;
/// How often the diagnostic report is sent.
const DIAGNOSTIC_PERIOD_MS: u64 = 20;
/// How often the status LED blinks and the joystick report is refreshed without a signal.
const IDLE_PERIOD_MS: u64 = 1000;
const WATCHDOG_TIMEOUT_MS: u32 = 250;


static DECODERS: Decoders<MicrosecondClock, LoggingHooks> = Decoders::new(LoggingHooks);

static TASK_ALARM: SharedAlarm<Alarm0> = Mutex::new(RefCell::new(None));
static PPM_ALARM: SharedAlarm<Alarm1> = Mutex::new(RefCell::new(None));
static SRXL_ALARM: SharedAlarm<Alarm2> = Mutex::new(RefCell::new(None));
static CAPTURE: Mutex<RefCell<Option<CaptureInput>>> = Mutex::new(RefCell::new(None));
static SRXL_INPUT: Mutex<RefCell<Option<SrxlInput>>> = Mutex::new(RefCell::new(None));


#[entry]
fn main() -> ! {
	// Get access to the RP2040 peripherals.
	let mut pac = pac::Peripherals::take().unwrap();

	// Set up the watchdog driver - needed by the clock setup code.
	let mut watchdog = hal::Watchdog::new(pac.WATCHDOG);

	// Configure the clocks.
	let clocks = hal::clocks::init_clocks_and_plls(
		bsp::XOSC_CRYSTAL_FREQ,
		pac.XOSC,
		pac.CLOCKS,
		pac.PLL_SYS,
		pac.PLL_USB,
		&mut pac.RESETS,
		&mut watchdog,
	)
		.ok()
		.unwrap();

	// Set up the pins.
	let sio = hal::Sio::new(pac.SIO);
	let pins = bsp::Pins::new(
		pac.IO_BANK0,
		pac.PADS_BANK0,
		sio.gpio_bank0,
		&mut pac.RESETS,
	);

	let mut led = pins.led.into_push_pull_output();
	let signal: SignalPin = pins.gpio2.into_pull_up_input();
	let uart_pins: UartPins = (pins.gpio0.into_function(), pins.gpio1.into_function());

	// Set up the SRXL UART.
	let uart = UartPeripheral::new(pac.UART0, uart_pins, &mut pac.RESETS)
		.enable(
			UartConfig::new(srxl::BAUDRATE.Hz(), DataBits::Eight, None, StopBits::One),
			clocks.peripheral_clock.freq(),
		)
		.unwrap();

	// Set up the timer and its alarms.
	let mut timer = hal::Timer::new(pac.TIMER, &mut pac.RESETS, &clocks);
	let mut task_alarm = HardwareAlarm::new(timer.alarm_0().unwrap());
	let ppm_alarm = HardwareAlarm::new(timer.alarm_1().unwrap());
	let srxl_alarm = HardwareAlarm::new(timer.alarm_2().unwrap());
	task_alarm.schedule_in(TASK_PERIOD_US);

	// Load the stored configuration before any decoder sees a signal.
	let mut store = FlashStore;
	let mut receiver = Receiver::new(&DECODERS);
	receiver.load_configuration(&mut store);

	critical_section::with(|cs| {
		TASK_ALARM.borrow(cs).replace(Some(task_alarm));
		PPM_ALARM.borrow(cs).replace(Some(ppm_alarm));
		SRXL_ALARM.borrow(cs).replace(Some(srxl_alarm));
		CAPTURE.borrow(cs).replace(Some(CaptureInput::new(signal)));
		SRXL_INPUT.borrow(cs).replace(Some(SrxlInput::new(uart)));
	});

	// SAFETY: the handlers only touch state shared through the statics above.
	unsafe {
		NVIC::unmask(pac::Interrupt::TIMER_IRQ_0);
		NVIC::unmask(pac::Interrupt::TIMER_IRQ_1);
		NVIC::unmask(pac::Interrupt::TIMER_IRQ_2);
		NVIC::unmask(pac::Interrupt::IO_IRQ_BANK0);
		NVIC::unmask(pac::Interrupt::UART0_IRQ);
	}

	// Set up the USB driver.
	let usb_bus = UsbBusAllocator::new(hal::usb::UsbBus::new(
		pac.USBCTRL_REGS,
		pac.USBCTRL_DPRAM,
		clocks.usb_clock,
		true,
		&mut pac.RESETS,
	));

	let mut joystick = HIDClass::new_ep_in(&usb_bus, JoystickReport::desc(), USB_POLL_RATE_MS);
	let mut diagnostic = HIDClass::new_ep_in(&usb_bus, DiagnosticReport::desc(), 10);
	let mut commands = HIDClass::new(&usb_bus, ConfigurationReport::desc(), 10);

	let mut usb_dev = UsbDeviceBuilder::new(&usb_bus, UsbVidPid(0x16C0, 0x03E8))
		.strings(&[StringDescriptors::default()
			.manufacturer("pico-rcjoy")
			.product("RC Joystick")
			.serial_number("0000")
		])
		.unwrap()
		.device_class(0x00)
		.build();

	watchdog.start(MicrosDurationU32::millis(WATCHDOG_TIMEOUT_MS));

	let now_ms = || timer.get_counter().ticks() / 1000;

	let mut last_report_ms = now_ms();
	let mut last_idle_ms = now_ms();
	let mut last_diagnostic_ms = now_ms();
	let mut update_interval_ms: u16 = 0;
	let mut command = [0u8; 64];

	loop {
		watchdog.feed();
		receiver.update();

		usb_dev.poll(&mut [&mut joystick, &mut diagnostic, &mut commands]);

		let now = now_ms();

		if receiver.is_receiving() {
			if receiver.has_new_data() && joystick.push_raw_input(&receiver.joystick_report().to_bytes()).is_ok() {
				update_interval_ms = now.wrapping_sub(last_report_ms) as u16;
				last_report_ms = now;
				let _ = led.set_high();
				receiver.clear_new_data();
			}
		}
		else if now.wrapping_sub(last_idle_ms) >= IDLE_PERIOD_MS {
			last_idle_ms = now;
			update_interval_ms = 0;
			let _ = led.toggle();
			let _ = joystick.push_raw_input(&receiver.joystick_report().to_bytes());
		}

		if now.wrapping_sub(last_diagnostic_ms) >= DIAGNOSTIC_PERIOD_MS {
			last_diagnostic_ms = now;
			let _ = diagnostic.push_raw_input(&receiver.diagnostic_report(update_interval_ms).to_bytes());
		}

		if let Ok(count) = commands.pull_raw_output(&mut command) {
			match receiver.process_command(&command[..count], &mut store) {
				Ok(Response::Handled) => {
					let _ = commands.push_raw_input(&receiver.configuration_report().to_bytes());
				}
				Ok(Response::EnterBootloader) => {
					log_info!("Entering the USB bootloader");
					hal::rom_data::reset_to_usb_boot(0, 0);
				}
				Err(error) => log_warn!("Command rejected: {:?}", error),
			}
		}
	}
}


/// Periodic decoder housekeeping.
#[interrupt]
fn TIMER_IRQ_0() {
	critical_section::with(|cs| {
		if let Some(alarm) = TASK_ALARM.borrow_ref_mut(cs).as_mut() {
			alarm.clear_interrupt();
			alarm.schedule_in(TASK_PERIOD_US);
		}
	});

	DECODERS.run_task();
}

/// The PPM sync pause elapsed.
#[interrupt]
fn TIMER_IRQ_1() {
	critical_section::with(|cs| {
		if let Some(alarm) = PPM_ALARM.borrow_ref_mut(cs).as_mut() {
			alarm.clear_interrupt();
		}
	});

	DECODERS.ppm.on_sync_timeout();
}

/// The SRXL line has been idle for a sync pause.
#[interrupt]
fn TIMER_IRQ_2() {
	critical_section::with(|cs| {
		if let Some(alarm) = SRXL_ALARM.borrow_ref_mut(cs).as_mut() {
			alarm.clear_interrupt();
		}
	});

	DECODERS.srxl.on_sync_timeout();
}

/// An edge on the PPM/PCM input.
#[interrupt]
fn IO_IRQ_BANK0() {
	let time = timestamp();
	let edges = critical_section::with(|cs| {
		CAPTURE.borrow_ref_mut(cs).as_mut().map_or([None, None], CaptureInput::take_edges)
	});

	let mut alarm = AlarmHandle(&PPM_ALARM);
	for rising_edge in edges.into_iter().flatten() {
		DECODERS.on_capture(time, rising_edge, &mut alarm);
	}
}

/// Bytes received on the SRXL UART.
#[interrupt]
fn UART0_IRQ() {
	let mut buffer = [0u8; 32];
	let count = critical_section::with(|cs| {
		SRXL_INPUT.borrow_ref_mut(cs).as_mut().map_or(0, |input| input.read(&mut buffer))
	});

	let time = timestamp();
	let mut alarm = AlarmHandle(&SRXL_ALARM);
	for byte in &buffer[..count] {
		DECODERS.srxl.on_byte(*byte, time, &mut alarm);
	}
}
