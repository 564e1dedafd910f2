//! Local lifecycle of a code-execution job.
//!
//! The peer never acknowledges anything, so a job is `Completed` as soon as
//! the datagram has left the local socket. There is no confirmed state.

use rand::Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Received,
    Validated,
    Sent,
    Completed,
}

/// Local correlation handle plus dispatch latency. Not peer-confirmed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResult {
    pub job_id: String,
    /// Wall-clock time from `Received` to `Sent`.
    pub elapsed_ms: f64,
}

#[derive(Debug)]
pub struct Job {
    id: String,
    state: JobState,
    received_at: Instant,
    sent_at: Option<Instant>,
}

impl Job {
    pub fn received(id: String, received_at: Instant) -> Self {
        Self {
            id,
            state: JobState::Received,
            received_at,
            sent_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn validated(&mut self) {
        self.advance(JobState::Validated);
    }

    pub fn sent(&mut self) {
        self.sent_at = Some(Instant::now());
        self.advance(JobState::Sent);
    }

    /// 로컬 전송 성공 직후 완료로 선언
    pub fn complete(mut self) -> JobResult {
        if self.sent_at.is_none() {
            self.sent();
        }
        self.advance(JobState::Completed);
        let sent_at = self.sent_at.unwrap_or(self.received_at);
        JobResult {
            job_id: self.id,
            elapsed_ms: sent_at.duration_since(self.received_at).as_secs_f64() * 1000.0,
        }
    }

    // 상태는 앞으로만 이동
    fn advance(&mut self, to: JobState) {
        if to > self.state {
            self.state = to;
        }
    }
}

/// 단조 증가 카운터 + 랜덤 접미사로 프로세스 내에서 유일한 job id 생성
#[derive(Debug, Default)]
pub struct JobIds {
    counter: AtomicU64,
}

impl JobIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let suffix: u32 = rand::rng().random();
        format!("job-{:06}-{:08x}", n, suffix)
    }
}
