// SPDX-FileCopyrightText: 2025 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! The cooperative main loop: drains both transports into the framer,
//! dispatches frames, runs the OTA background erase, drives the boot
//! gate and streams IMU telemetry. Everything that touches the OTA
//! engine, the flash or the event log lives on this single task.

use defmt::{error, info, warn, Debug2Format};
use embassy_nrf::buffered_uarte::BufferedUarteRx;
use embassy_nrf::gpio::Output;
use embassy_nrf::nvmc::Nvmc;
use embassy_nrf::peripherals::{TIMER1, UARTE0};
use embassy_time::{with_timeout, Duration, Instant};
use embedded_io_async::Read;
use host_protocol::{self as proto, FeedResult, FrameAccumulator, StreamControl, MAX_FRAME_SIZE};
use nrf_softdevice::{temperature_celsius, Softdevice};
use ota_core::{ConfirmGate, FrameSink, GateState, HealthMonitor, OtaEngine, Platform, State};

use crate::health::Health;
use crate::imu::Lsm6;
use crate::{identity, status, FrameBytes, BT_DATA_RX, TX_BLE, TX_UART};

/// Main-loop cadence; matches the IMU streaming rate of ~100 Hz.
const LOOP_TICK_MS: u64 = 10;

/// Encodes frames and fans them out to both transports. Best-effort on
/// both: a saturated queue drops the frame.
pub struct TxSink;

impl FrameSink for TxSink {
    fn send(&mut self, frame_type: u8, payload: &[u8]) {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let Ok(wire) = proto::encode(frame_type, payload, &mut buf) else {
            return;
        };
        let frame = FrameBytes::from_slice(wire).unwrap();
        if TX_BLE.try_send(frame.clone()).is_err() {
            warn!("BLE tx queue full, frame 0x{:02x} dropped", frame_type);
        }
        if TX_UART.try_send(frame).is_err() {
            warn!("UART tx queue full, frame 0x{:02x} dropped", frame_type);
        }
    }
}

/// Time, yield, delay and reset for the OTA engine.
pub struct Board;

impl Platform for Board {
    fn now_ms(&mut self) -> u32 {
        Instant::now().as_millis() as u32
    }

    fn yield_radio(&mut self) {
        // Radio servicing runs from the SoftDevice's higher-priority
        // interrupts; the hook marks the flash suspension points.
        cortex_m::asm::nop();
    }

    fn delay_ms(&mut self, ms: u32) {
        embassy_time::block_for(Duration::from_millis(ms as u64));
    }

    fn reboot(&mut self) {
        cortex_m::peripheral::SCB::sys_reset();
    }
}

/// Health checks gating the post-OTA confirm: the radio stack is up
/// (this loop only runs once the SoftDevice is) and the IMU probed
/// successfully at boot.
struct BoardHealth {
    imu_present: bool,
}

impl HealthMonitor for BoardHealth {
    fn healthy(&mut self) -> bool {
        self.imu_present
    }
}

struct AppState {
    sd: &'static Softdevice,
    device_id: [u8; 8],
    health: Health,
    stream_accel: bool,
    stream_gyro: bool,
    samples_recorded: u32,
    gyro_saturation: u16,
    safe_mode: bool,
}

type Engine = OtaEngine<Nvmc<'static>, TxSink, Board>;

pub async fn main_loop(
    sd: &'static Softdevice,
    flash: Nvmc<'static>,
    mut uart_rx: BufferedUarteRx<'static, UARTE0, TIMER1>,
    mut led: Output<'static>,
    imu: Lsm6<'static>,
    device_id: [u8; 8],
    health: Health,
) {
    let mut engine = Engine::new(flash, TxSink, Board);
    let mut gate = ConfirmGate::new();
    let mut imu = Some(imu);
    let mut app = AppState {
        sd,
        device_id,
        health,
        stream_accel: false,
        stream_gyro: false,
        samples_recorded: 0,
        gyro_saturation: 0,
        safe_mode: false,
    };

    let mut ble_acc = FrameAccumulator::new();
    let mut uart_acc = FrameAccumulator::new();
    let mut raw = [0u8; 64];
    let mut last_status = Instant::now();

    loop {
        // Radio bytes queued by the NUS write handler.
        while let Ok(packet) = BT_DATA_RX.try_receive() {
            feed(&mut ble_acc, &packet, &mut engine, &mut app);
        }

        // Bench UART carries the identical framing.
        if let Ok(Ok(n)) = with_timeout(Duration::from_millis(1), uart_rx.read(&mut raw)).await {
            if n > 0 {
                feed(&mut uart_acc, &raw[..n], &mut engine, &mut app);
            }
        }

        // Background erase, one sector per turn.
        if let Err(e) = engine.poll() {
            error!("flash erase failed: {}", Debug2Format(&e));
        }

        // Confirm-or-rollback window after a test boot.
        if gate.outcome().is_none() {
            let mut monitor = BoardHealth {
                imu_present: imu.is_some(),
            };
            match gate.poll(&mut engine, &mut monitor) {
                Ok(GateState::Confirmed) => info!("new image confirmed"),
                Ok(GateState::Expired) => warn!("confirm window expired; next reset rolls back"),
                Ok(GateState::SafeMode) => {
                    warn!("repeated test boot failures; entering safe mode");
                    app.safe_mode = true;
                    app.stream_accel = false;
                    app.stream_gyro = false;
                }
                Ok(_) => {}
                Err(e) => error!("flag access failed: {}", Debug2Format(&e)),
            }
        }

        // Unsolicited health heartbeat.
        if last_status.elapsed() >= Duration::from_millis(consts::STATUS_INTERVAL_MS as u64) {
            last_status = Instant::now();
            send_device_status(&mut engine, &app);
        }

        // IMU streaming telemetry.
        if (app.stream_accel || app.stream_gyro) && !app.safe_mode {
            if let Some(imu) = imu.as_mut() {
                match imu.read(Instant::now().as_millis() as u32).await {
                    Ok(reading) => {
                        app.samples_recorded = app.samples_recorded.wrapping_add(1);
                        if reading.gyro_saturated {
                            app.gyro_saturation = app.gyro_saturation.saturating_add(1);
                        }
                        if app.stream_accel {
                            engine.sink_mut().send(proto::MSG_ACCEL, &reading.accel.to_bytes());
                        }
                        if app.stream_gyro {
                            engine.sink_mut().send(proto::MSG_GYRO, &reading.gyro.to_bytes());
                        }
                    }
                    Err(e) => {
                        error!("IMU read failed: {}", e);
                        app.health.set_last_error(crate::health::ERR_IMU);
                    }
                }
            }
        }

        update_led(&mut led, engine.state(), app.safe_mode);
        embassy_time::Timer::after_millis(LOOP_TICK_MS).await;
    }
}

/// Run transport bytes through a framer and dispatch every completed
/// frame.
fn feed(acc: &mut FrameAccumulator, bytes: &[u8], engine: &mut Engine, app: &mut AppState) {
    let mut window = bytes;
    while !window.is_empty() {
        window = match acc.feed(window) {
            FeedResult::Consumed => break,
            FeedResult::Overfull(rest) => {
                warn!("oversized frame discarded, resyncing");
                rest
            }
            FeedResult::Success { frame, remaining } => {
                dispatch(engine, app, frame.frame_type, frame.payload);
                remaining
            }
        };
    }
}

fn dispatch(engine: &mut Engine, app: &mut AppState, frame_type: u8, payload: &[u8]) {
    match frame_type {
        proto::CMD_GET_ID => {
            let record = identity::record(app.device_id);
            engine.sink_mut().send(proto::RSP_ID, &record.to_bytes());
        }
        proto::CMD_GET_STATUS => send_device_status(engine, app),
        proto::CMD_SET_STREAM => {
            if let Some(ctl) = StreamControl::parse(payload) {
                info!("stream accel={} gyro={}", ctl.accel, ctl.gyro);
                app.stream_accel = ctl.accel && !app.safe_mode;
                app.stream_gyro = ctl.gyro && !app.safe_mode;
            }
        }
        proto::CMD_OTA_START..=proto::CMD_OTA_GET_LOG => {
            if let Err(e) = engine.handle_frame(frame_type, payload) {
                error!("OTA flash fault: {}", Debug2Format(&e));
                app.health.set_last_error(crate::health::ERR_FLASH);
            }
        }
        _ => {}
    }
}

fn send_device_status(engine: &mut Engine, app: &AppState) {
    let flag = match engine.read_flag() {
        Ok(flag) => flag,
        Err(e) => {
            error!("flag read failed: {}", Debug2Format(&e));
            return;
        }
    };
    // Die temperature in 0.25 degC units, read through the SoftDevice.
    let temperature = temperature_celsius(app.sd).map(|t| t.to_bits() as i16).unwrap_or(0);
    let record = status::fill(engine.state(), &flag, app.safe_mode, status::Counters {
        uptime_ms: Instant::now().as_millis() as u32,
        last_error: app.health.last_error,
        error_flags: app.health.error_flags,
        reset_reason: app.health.reset_reason,
        samples_recorded: app.samples_recorded,
        gyro_saturation: app.gyro_saturation,
        temperature,
    });
    engine.sink_mut().send(proto::RSP_STATUS, &record.to_bytes());
}

/// Slow blink idle, fast blink while an OTA transfer is active, solid
/// in safe mode so the failure is visible at a glance.
fn update_led(led: &mut Output<'static>, state: State, safe_mode: bool) {
    if safe_mode {
        led.set_high();
        return;
    }
    let fast = matches!(
        state,
        State::PrepareErase | State::ReadyForData | State::Receiving | State::Verifying
    );
    let period = if fast { 100 } else { 1000 };
    if (Instant::now().as_millis() / period) % 2 == 0 {
        led.set_low();
    } else {
        led.set_high();
    }
}
