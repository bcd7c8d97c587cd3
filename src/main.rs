#![no_std]
#![no_main]

use defmt::*;
use embassy_executor::{InterruptExecutor, Spawner};
use embassy_stm32::interrupt;
use embassy_stm32::interrupt::{InterruptExt, Priority};
use {defmt_rtt as _, panic_probe as _};

use enose_embassy::{
    tasks::{acquisition_task, telemetry_task},
    Board, ScanConfig,
};

static EXECUTOR_HIGH: InterruptExecutor = InterruptExecutor::new();

#[interrupt]
unsafe fn USART2() {
    EXECUTOR_HIGH.on_interrupt()
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Starting e-nose acquisition with multi-priority executors");

    let board = match Board::init() {
        Ok(board) => board,
        Err(e) => {
            error!("Board initialization failed: {:?}", e);
            return;
        }
    };
    let config = match ScanConfig::board_default() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid scan configuration: {:?}", e);
            return;
        }
    };
    let (scanner, link) = match board.into_scanner(config) {
        Ok(parts) => parts,
        Err(e) => {
            error!("Scan controller rejected configuration: {:?}", e);
            return;
        }
    };

    // Acquisition preempts the forwarder so settling and pacing hold
    // while a frame is being written.
    interrupt::USART2.set_priority(Priority::P1);
    let spawner_high_priority = EXECUTOR_HIGH.start(interrupt::USART2);
    spawner_high_priority.must_spawn(acquisition_task(scanner));
    info!("Acquisition task spawned on high-priority executor");

    spawner.must_spawn(telemetry_task(link));
    info!("Telemetry task spawned on main executor");

    core::future::pending::<()>().await;
}
