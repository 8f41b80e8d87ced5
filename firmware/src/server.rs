// SPDX-FileCopyrightText: 2025 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::nus::*;
use crate::{TX_BLE, TX_SUBSCRIBED};
use consts::{ATT_MTU, DEVICE_NAME, SERVICES_LIST, SHORT_NAME};
use core::mem;
use core::sync::atomic::Ordering;
use defmt::{info, *};
use host_protocol::MAX_BLE_PACKET;
use nrf_softdevice::ble::advertisement_builder::{ExtendedAdvertisementBuilder, ExtendedAdvertisementPayload, Flag, ServiceList};
use nrf_softdevice::ble::gatt_server::notify_value;
use nrf_softdevice::ble::peripheral;
use nrf_softdevice::ble::{gatt_server, Connection};
use nrf_softdevice::{gatt_server, raw, Softdevice};
use raw::ble_gap_conn_params_t;

// Get connection interval with macro
// to get 15ms just call ci_ms!(15)
macro_rules! ci_ms {
    ($a:expr) => {{
        $a * 1000 / 1250
    }};
}

#[gatt_server]
pub struct Server {
    pub nus: Nus,
}

pub fn initialize_sd() -> &'static mut Softdevice {
    let config = nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_XTAL as u8,
            rc_ctiv: 0,
            rc_temp_ctiv: 0,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_20_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: 1,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t { att_mtu: ATT_MTU as u16 }),
        gatts_attr_tab_size: Some(raw::ble_gatts_cfg_attr_tab_size_t {
            attr_tab_size: raw::BLE_GATTS_ATTR_TAB_SIZE_DEFAULT,
        }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: 1,
            central_role_count: 0,
            central_sec_count: 0,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        gap_device_name: Some(raw::ble_gap_cfg_device_name_t {
            p_value: DEVICE_NAME.as_ptr() as _,
            current_len: DEVICE_NAME.len() as u16,
            max_len: DEVICE_NAME.len() as u16,
            write_perm: unsafe { mem::zeroed() },
            _bitfield_1: raw::ble_gap_cfg_device_name_t::new_bitfield_1(raw::BLE_GATTS_VLOC_STACK as u8),
        }),
        conn_gatts: Some(raw::ble_gatts_conn_cfg_t { hvn_tx_queue_size: 3 }),

        ..Default::default()
    };

    Softdevice::enable(&config)
}

/// Pushes queued frames to the connected client, split into packets the
/// negotiated MTU can carry. Frames queued while nobody subscribed are
/// discarded; the protocol is request/response and the host retries.
async fn notify_frames<'a>(server: &'a Server, connection: &'a Connection) {
    loop {
        let frame = TX_BLE.receive().await;
        if !TX_SUBSCRIBED.load(Ordering::Relaxed) {
            continue;
        }
        for packet in frame.chunks(MAX_BLE_PACKET) {
            if let Err(e) = notify_value(connection, server.nus.get_handle(), packet) {
                info!("Error on nus send {:?}", e);
                break;
            }
        }
    }
}

pub async fn run_bluetooth(sd: &'static Softdevice, server: &Server) {
    static ADV_DATA: ExtendedAdvertisementPayload = ExtendedAdvertisementBuilder::new()
        .flags(&[Flag::GeneralDiscovery, Flag::LE_Only])
        .services_128(ServiceList::Complete, &SERVICES_LIST)
        .short_name(SHORT_NAME)
        .build();

    static SCAN_DATA: ExtendedAdvertisementPayload = ExtendedAdvertisementBuilder::new().full_name(DEVICE_NAME).build();

    let adv = peripheral::ConnectableAdvertisement::ScannableUndirected {
        adv_data: &ADV_DATA,
        scan_data: &SCAN_DATA,
    };

    loop {
        // Set advertising timer in units of 625us (about 50ms with 75 units)
        let config = peripheral::Config {
            interval: 75,
            ..Default::default()
        };

        // Start advertising
        let conn = unwrap!(peripheral::advertise_connectable(sd, adv, &config).await);
        info!("advertising done!");

        // Request connection interval - trying to request a short one.
        let conn_params = ble_gap_conn_params_t {
            conn_sup_timeout: 500,
            max_conn_interval: ci_ms!(25),
            min_conn_interval: ci_ms!(12),
            slave_latency: 0,
        };

        // Request connection param update
        if let Err(e) = conn.set_conn_params(conn_params) {
            info!("set_conn_params error - {:?}", e)
        }

        let gatt_fut = gatt_server::run(&conn, server, |e| server.handle_event(e));
        let notify_fut = notify_frames(server, &conn);

        // Only send data while a client is connected; when the GATT
        // server finishes operating the notify future is also dropped.
        futures::pin_mut!(notify_fut);
        futures::pin_mut!(gatt_fut);

        match futures::future::select(notify_fut, gatt_fut).await {
            futures::future::Either::Left((_, _)) => {
                info!("Tx error")
            }
            futures::future::Either::Right((e, _)) => {
                info!("gatt_server run exited with error: {:?}", e);
            }
        }
        TX_SUBSCRIBED.store(false, Ordering::Relaxed);
    }
}

impl Server {
    fn handle_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::Nus(e) => self.nus.handle(e),
        }
    }
}
