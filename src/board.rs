use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_stm32::mode::{Async, Blocking};
use embassy_stm32::spi::{self, Spi};
use embassy_stm32::time::Hertz;
use embassy_stm32::usart::{self, UartTx};
use embassy_stm32::{rcc, Config};

use crate::config::{
    ConfigError, ScanConfig, ADC_SPI_HZ, CHANNEL_COUNT, LINK_BAUDRATE, SCAN_POINTS,
    WAVEGEN_MCLK_HZ, WAVEGEN_SPI_HZ,
};
use crate::drivers::{Ad9833, FramedLink, Ltc2310, Multiplexer, Unfitted};
use crate::scan::ScanController;

pub type AdcSpi = Spi<'static, Blocking>;
pub type Adc = Ltc2310<AdcSpi, Output<'static>>;
pub type WaveGen = Ad9833<Spi<'static, Blocking>, Output<'static>>;
pub type ChannelMux = Multiplexer<Output<'static>, { CHANNEL_COUNT as usize }>;
pub type Link = FramedLink<UartTx<'static, Async>>;
pub type Scanner = ScanController<WaveGen, ChannelMux, Adc, Unfitted, SCAN_POINTS>;

// ── Board struct ──────────────────────────────────────────
pub struct Board {
    pub adc: Adc,
    pub wavegen: WaveGen,
    pub mux: ChannelMux,
    pub link: Link,
}

#[derive(Debug, defmt::Format)]
pub enum BoardError {
    WaveGen(spi::Error),
    Uart(usart::ConfigError),
}

impl Board {
    pub fn init() -> Result<Self, BoardError> {
        let mut config = Config::default();

        // HSI16 -> PLL -> 64 MHz SYSCLK
        config.rcc.hsi = Some(rcc::Hsi {
            sys_div: rcc::HsiSysDiv::DIV1,
        });
        config.rcc.pll = Some(rcc::Pll {
            source: rcc::PllSource::HSI,
            prediv: rcc::PllPreDiv::DIV2,   // 16MHz / 2 = 8MHz
            mul: rcc::PllMul::MUL16,        // 8MHz * 16 = 128MHz
            divp: None,
            divq: None,
            divr: Some(rcc::PllRDiv::DIV2), // 128MHz / 2 = 64MHz
        });
        config.rcc.sys = rcc::Sysclk::PLL1_R;
        let p = embassy_stm32::init(config);

        // SPI1: LTC2310, full duplex, mode 0
        let mut adc_cfg = spi::Config::default();
        adc_cfg.mode = spi::MODE_0;
        adc_cfg.frequency = Hertz(ADC_SPI_HZ);
        let adc_spi = Spi::new_blocking(p.SPI1, p.PA5, p.PA7, p.PA6, adc_cfg);
        let adc_cs = Output::new(p.PA4, Level::High, Speed::VeryHigh);
        let adc = Ltc2310::new(adc_spi, adc_cs);

        // SPI2: AD9833, write only, mode 2
        let mut dds_cfg = spi::Config::default();
        dds_cfg.mode = spi::MODE_2;
        dds_cfg.frequency = Hertz(WAVEGEN_SPI_HZ);
        let dds_spi = Spi::new_blocking_txonly(p.SPI2, p.PB13, p.PB15, dds_cfg);
        let fsync = Output::new(p.PB12, Level::High, Speed::VeryHigh);
        let wavegen = Ad9833::new(dds_spi, fsync, WAVEGEN_MCLK_HZ).map_err(BoardError::WaveGen)?;

        // Multiplexer enables, one-hot
        let mux = Multiplexer::new([
            Output::new(p.PB0, Level::Low, Speed::Low),
            Output::new(p.PB1, Level::Low, Speed::Low),
            Output::new(p.PB2, Level::Low, Speed::Low),
            Output::new(p.PB3, Level::Low, Speed::Low),
        ]);

        // USART1 TX: telemetry link
        let mut us_cfg = usart::Config::default();
        us_cfg.baudrate = LINK_BAUDRATE;
        let tx = UartTx::new(p.USART1, p.PC4, p.DMA1_CH2, us_cfg).map_err(BoardError::Uart)?;

        Ok(Self {
            adc,
            wavegen,
            mux,
            link: FramedLink::new(tx),
        })
    }

    /// Splits the board into the scan controller and the link.
    pub fn into_scanner(self, config: ScanConfig) -> Result<(Scanner, Link), ConfigError> {
        let scanner = ScanController::new(config, self.wavegen, self.mux, self.adc, Unfitted)?;
        Ok((scanner, self.link))
    }
}
