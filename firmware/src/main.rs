// SPDX-FileCopyrightText: 2025 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

#![no_std]
#![no_main]

mod comms;
mod health;
mod identity;
mod imu;
mod nus;
mod server;
mod status;

#[cfg(feature = "debug")]
use defmt_rtt as _;
// time driver
use embassy_nrf as _;
use panic_probe as _;

use defmt::{info, *};
use embassy_executor::Spawner;
use embassy_nrf::buffered_uarte::{self, BufferedUarte, BufferedUarteTx};
use embassy_nrf::gpio::{Level, Output, OutputDrive};
use embassy_nrf::interrupt::{self, InterruptExt};
use embassy_nrf::nvmc::Nvmc;
use embassy_nrf::peripherals::{TIMER1, TWISPI0, UARTE0};
use embassy_nrf::{bind_interrupts, twim, uarte};
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::Timer;
use embedded_io_async::Write;
use host_protocol::{Message, MAX_FRAME_SIZE};
use nrf_softdevice::Softdevice;
use static_cell::StaticCell;

use core::pin::pin;
use core::sync::atomic::AtomicBool;

use server::{initialize_sd, run_bluetooth, Server};

bind_interrupts!(struct Irqs {
    UARTE0_UART0 => buffered_uarte::InterruptHandler<UARTE0>;
    SPIM0_SPIS0_TWIM0_TWIS0_SPI0_TWI0 => twim::InterruptHandler<TWISPI0>;
});

#[cfg(not(feature = "debug"))]
mod dummy_logging {
    #[defmt::global_logger]
    struct Logger;

    unsafe impl defmt::Logger for Logger {
        fn acquire() {}

        unsafe fn flush() {}

        unsafe fn release() {}

        unsafe fn write(_bytes: &[u8]) {}
    }
}

/// One fully framed protocol message on its way out.
pub type FrameBytes = heapless::Vec<u8, MAX_FRAME_SIZE>;

/// Maximum number of BLE packets that can be buffered.
/// This limits memory usage while ensuring reliable data transfer.
pub const BT_MAX_NUM_PKT: usize = 16;

/// Raw bytes written to the NUS RX characteristic, interrupt side to
/// main loop.
static BT_DATA_RX: Channel<ThreadModeRawMutex, Message, BT_MAX_NUM_PKT> = Channel::new();

/// Outgoing frames, fanned out to both transports. Sends are
/// best-effort: a full queue drops the frame and the OTA protocol's
/// offset re-acking absorbs the loss.
static TX_BLE: Channel<ThreadModeRawMutex, FrameBytes, 8> = Channel::new();
static TX_UART: Channel<ThreadModeRawMutex, FrameBytes, 8> = Channel::new();

/// Whether a peer has enabled notifications on the NUS TX characteristic.
static TX_SUBSCRIBED: AtomicBool = AtomicBool::new(false);

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    info!("SD is running");
    sd.run().await
}

/// Drains the UART half of the frame fan-out.
#[embassy_executor::task]
async fn uart_writer_task(mut tx: BufferedUarteTx<'static, UARTE0, TIMER1>) {
    loop {
        let frame = TX_UART.receive().await;
        let _ = tx.write_all(&frame).await;
        let _ = tx.flush().await;
    }
}

/// Boot failure indication: `blinks` short pulses, long pause, forever.
/// 1 = selftest, 2 = IMU, 3 = radio.
async fn blink_code_forever(led: &mut Output<'static>, blinks: u8) -> ! {
    loop {
        for _ in 0..blinks {
            led.set_high();
            Timer::after_millis(100).await;
            led.set_low();
            Timer::after_millis(100).await;
        }
        Timer::after_millis(1200).await;
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let mut conf = embassy_nrf::config::Config::default();
    conf.hfclk_source = embassy_nrf::config::HfclkSource::ExternalXtal;
    conf.lfclk_source = embassy_nrf::config::LfclkSource::ExternalXtal;
    conf.gpiote_interrupt_priority = interrupt::Priority::P2;
    conf.time_interrupt_priority = interrupt::Priority::P2;

    let p = embassy_nrf::init(conf);

    let mut led = Output::new(p.P0_06, Level::Low, OutputDrive::Standard);

    let health = health::Health::init();
    info!("boot, reset reason {}", health.reset_reason);

    if !health::selftest_mem() {
        error!("SELFTEST failed");
        blink_code_forever(&mut led, 1).await;
    }

    // The IMU rail is switched; power it and give it time to settle.
    let _imu_pwr = Output::new(p.P1_08, Level::High, OutputDrive::Standard);
    Timer::after_millis(10).await;

    let mut twim_config = twim::Config::default();
    twim_config.frequency = twim::Frequency::K400;
    interrupt::SPIM0_SPIS0_TWIM0_TWIS0_SPI0_TWI0.set_priority(interrupt::Priority::P3);
    let i2c = twim::Twim::new(p.TWISPI0, Irqs, p.P0_07, p.P0_27, twim_config);
    let imu = match imu::Lsm6::new(i2c).await {
        Ok(imu) => imu,
        Err(e) => {
            error!("IMU init failed: {}", e);
            blink_code_forever(&mut led, 2).await;
        }
    };
    info!("IMU up");

    // Bench UART carrying the same framing as BLE.
    let mut uart_config = uarte::Config::default();
    uart_config.parity = uarte::Parity::EXCLUDED;
    uart_config.baudrate = uarte::Baudrate::BAUD115200;
    static UART_RX_BUF: StaticCell<[u8; 512]> = StaticCell::new();
    static UART_TX_BUF: StaticCell<[u8; 512]> = StaticCell::new();
    interrupt::UARTE0_UART0.set_priority(interrupt::Priority::P3);
    let uart = BufferedUarte::new(
        p.UARTE0,
        p.TIMER1,
        p.PPI_CH0,
        p.PPI_CH1,
        p.PPI_GROUP0,
        Irqs,
        p.P0_11,
        p.P0_12,
        uart_config,
        UART_RX_BUF.init([0; 512]),
        UART_TX_BUF.init([0; 512]),
    );
    let (uart_rx, uart_tx) = uart.split();

    let sd = initialize_sd();
    let server = match Server::new(sd) {
        Ok(server) => server,
        Err(_) => {
            error!("creating the GATT server failed");
            blink_code_forever(&mut led, 3).await;
        }
    };
    let sd: &'static Softdevice = sd;
    unwrap!(spawner.spawn(softdevice_task(sd)), "Spawning the softdevice failed");
    unwrap!(spawner.spawn(uart_writer_task(uart_tx)));

    let device_id = identity::read_uid();
    info!("Device ID: {=[u8;8]:#X}", device_id);

    // The staging slot and flag sector live in NVMC-addressed flash.
    let flash = Nvmc::new(p.NVMC);

    led.set_high(); // solid: running

    let shell = comms::main_loop(sd, flash, uart_rx, led, imu, device_id, health);
    let ble = run_bluetooth(sd, &server);
    info!("Init tasks");

    futures::future::select(pin!(shell), pin!(ble)).await;
}
