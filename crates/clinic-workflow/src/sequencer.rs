//! 排队号生成器
//!
//! 按服务站生成连续、无空洞、严格递增的排队号

use clinic_core::{StationKind, TicketCode};
use tokio::sync::{Mutex, MutexGuard};

/// 排队号生成器
///
/// 每个服务站一个独立计数器，不同服务站之间互不阻塞
#[derive(Debug)]
pub struct TicketSequencer {
    counters: [Mutex<u32>; 4],
}

/// 已签发的排队号
///
/// 持有期间同一服务站的下一次签发会等待，入队方借此保证号码顺序与入队顺序一致
#[derive(Debug)]
pub struct IssuedCode<'a> {
    code: TicketCode,
    _guard: MutexGuard<'a, u32>,
}

impl IssuedCode<'_> {
    pub fn code(&self) -> TicketCode {
        self.code
    }
}

impl TicketSequencer {
    /// 创建新的排队号生成器，所有计数从零开始
    pub fn new() -> Self {
        Self {
            counters: [Mutex::new(0), Mutex::new(0), Mutex::new(0), Mutex::new(0)],
        }
    }

    /// 由服务站和已签发数量计算下一个排队号
    pub fn code_for(station: StationKind, issued: u32) -> TicketCode {
        TicketCode::new(station, issued + 1)
    }

    /// 签发下一个排队号并保持该服务站的锁
    pub async fn issue(&self, station: StationKind) -> IssuedCode<'_> {
        let mut guard = self.counter(station).lock().await;
        let code = Self::code_for(station, *guard);
        *guard = code.number;

        tracing::debug!("Issued ticket code {} for station {}", code, station);
        IssuedCode {
            code,
            _guard: guard,
        }
    }

    /// 签发下一个排队号
    pub async fn next(&self, station: StationKind) -> TicketCode {
        self.issue(station).await.code()
    }

    /// 某服务站已签发的号码数量（含已取消的）
    pub async fn issued(&self, station: StationKind) -> u32 {
        *self.counter(station).lock().await
    }

    fn counter(&self, station: StationKind) -> &Mutex<u32> {
        let index = match station {
            StationKind::Doctor => 0,
            StationKind::Lab => 1,
            StationKind::Pharmacy => 2,
            StationKind::Cashier => 3,
        };
        &self.counters[index]
    }
}

impl Default for TicketSequencer {
    fn default() -> Self {
        Self::new()
    }
}
