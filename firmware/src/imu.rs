// SPDX-FileCopyrightText: 2025 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Minimal LSM6-class IMU driver over the internal TWIM bus, enough for
//! the streaming telemetry path: WHO_AM_I probe, fixed 104 Hz output
//! data rate, combined gyro + accel burst read.

use defmt::Format;
use embassy_nrf::peripherals::TWISPI0;
use embassy_nrf::twim::{self, Twim};
use host_protocol::ImuSample;

const ADDR: u8 = 0x6A;

const REG_WHO_AM_I: u8 = 0x0F;
const REG_CTRL1_XL: u8 = 0x10;
const REG_CTRL2_G: u8 = 0x11;
const REG_CTRL3_C: u8 = 0x12;
const REG_OUTX_L_G: u8 = 0x22;

const WHO_AM_I_VALUE: u8 = 0x6C;

/// 104 Hz, +-2 g: 0.061 mg/LSB.
const ACCEL_SENS_G: f32 = 0.000_061;
/// 104 Hz, +-245 dps: 8.75 mdps/LSB.
const GYRO_SENS_DPS: f32 = 0.008_75;

/// Raw gyro counts at which we call the axis saturated.
const GYRO_SATURATION_COUNTS: i16 = 32_000;

#[derive(Debug, Format)]
pub enum Error {
    Bus(twim::Error),
    WrongId(u8),
}

impl From<twim::Error> for Error {
    fn from(e: twim::Error) -> Self {
        Error::Bus(e)
    }
}

pub struct ImuReading {
    pub accel: ImuSample,
    pub gyro: ImuSample,
    pub gyro_saturated: bool,
}

pub struct Lsm6<'d> {
    i2c: Twim<'d, TWISPI0>,
}

impl Lsm6<'static> {
    pub async fn new(i2c: Twim<'static, TWISPI0>) -> Result<Self, Error> {
        let mut imu = Self { i2c };
        let id = imu.read_reg(REG_WHO_AM_I).await?;
        if id != WHO_AM_I_VALUE {
            return Err(Error::WrongId(id));
        }
        // Block data update + auto-increment, then both sensors at 104 Hz.
        imu.write_reg(REG_CTRL3_C, 0x44).await?;
        imu.write_reg(REG_CTRL1_XL, 0x40).await?;
        imu.write_reg(REG_CTRL2_G, 0x40).await?;
        Ok(imu)
    }

    /// Burst read of gyro then accel output registers.
    pub async fn read(&mut self, t_ms: u32) -> Result<ImuReading, Error> {
        let mut raw = [0u8; 12];
        self.i2c.write_read(ADDR, &[REG_OUTX_L_G], &mut raw).await?;

        let word = |i: usize| i16::from_le_bytes([raw[i], raw[i + 1]]);
        let (gx, gy, gz) = (word(0), word(2), word(4));
        let (ax, ay, az) = (word(6), word(8), word(10));

        Ok(ImuReading {
            accel: ImuSample {
                t_ms,
                x: ax as f32 * ACCEL_SENS_G,
                y: ay as f32 * ACCEL_SENS_G,
                z: az as f32 * ACCEL_SENS_G,
            },
            gyro: ImuSample {
                t_ms,
                x: gx as f32 * GYRO_SENS_DPS,
                y: gy as f32 * GYRO_SENS_DPS,
                z: gz as f32 * GYRO_SENS_DPS,
            },
            gyro_saturated: [gx, gy, gz].iter().any(|v| v.unsigned_abs() >= GYRO_SATURATION_COUNTS as u16),
        })
    }

    async fn read_reg(&mut self, reg: u8) -> Result<u8, Error> {
        let mut out = [0u8; 1];
        self.i2c.write_read(ADDR, &[reg], &mut out).await?;
        Ok(out[0])
    }

    async fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), Error> {
        self.i2c.write(ADDR, &[reg, value]).await?;
        Ok(())
    }
}
