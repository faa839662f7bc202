//! One provisioning run per unit.
//!
//! Track A (S3): certificate, firmware, reboot, MAC reads, then the factory
//! handshake on its own thread. Track B (H2): firmware. Track B runs whether or
//! not track A failed; both resolve checks on the same report.

use crate::track::{StageDefinition, TrackRunner};
use fab_core::config::StationConfig;
use fab_core::flash::{ProvisioningPlan, StepRunner};
use fab_core::report::{Check, CheckOutcome, ProvisioningReport};
use fab_core::serial::{
    FactoryState, HandshakeEvent, HandshakeHandle, SerialHandshake, StopToken,
};
use fab_error::ProvisionResult;
use fab_hal::StationHal;
use log::{error, info, warn};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Poll interval once the handshake deadline has passed and the reader is
/// winding down.
const DRAIN_POLL: Duration = Duration::from_millis(50);

pub struct Sequencer {
    hal: Arc<dyn StationHal>,
    plan: ProvisioningPlan,
    observer: Option<Sender<HandshakeEvent>>,
}

struct HandshakeSession {
    handle: HandshakeHandle,
    monitor: JoinHandle<()>,
}

impl Sequencer {
    pub fn new(hal: Arc<dyn StationHal>, plan: ProvisioningPlan) -> Self {
        Self {
            hal,
            plan,
            observer: None,
        }
    }

    /// Forward every handshake event (device lines, factory-mode changes) to `tx`.
    pub fn with_observer(mut self, tx: Sender<HandshakeEvent>) -> Self {
        self.observer = Some(tx);
        self
    }

    pub fn plan(&self) -> &ProvisioningPlan {
        &self.plan
    }

    pub fn run_unit_provisioning(&self, order_id: Option<String>) -> ProvisioningReport {
        self.run_with_report(ProvisioningReport::new(order_id))
    }

    /// Run into a caller-supplied report, e.g. one already subscribed to.
    pub fn run_with_report(&self, report: ProvisioningReport) -> ProvisioningReport {
        let plan = &self.plan;
        let runner = StepRunner::new(self.hal.as_ref(), plan.tool.as_str(), plan.tool_timeout);
        info!(
            "🏭 provisioning unit {}",
            report.order_id().as_deref().unwrap_or("(no order)")
        );

        let track_a = [
            StageDefinition::new(Check::S3CertificateFlash, || {
                runner.run(&plan.s3_certificate)
            }),
            StageDefinition::new(Check::S3FirmwareFlash, || runner.run(&plan.s3_firmware)),
            StageDefinition::new(Check::S3Reboot, || runner.run_one_shot(&plan.s3_reboot)),
        ];
        let outcome = TrackRunner::new("s3", &report).run(&track_a);

        let session = if outcome.is_ok() {
            for step in [&plan.s3_mac, &plan.h2_mac] {
                let reading = runner.read_mac(step);
                if !reading.result.is_success() {
                    warn!(
                        "{} MAC read did not succeed: {}",
                        step.target(),
                        reading.result.detail().unwrap_or_default()
                    );
                }
                if let Err(err) = report.record_mac(step.target(), reading.mac) {
                    warn!("MAC not recorded: {}", err);
                }
            }
            Some(self.start_handshake(&report))
        } else {
            info!("s3 track stopped; skipping MAC reads and factory handshake");
            None
        };

        let track_b = [StageDefinition::new(Check::H2FirmwareFlash, || {
            runner.run(&plan.h2_firmware)
        })];
        TrackRunner::new("h2", &report).run(&track_b);

        if let Some(session) = session {
            self.finish_handshake(session, &report);
        }

        report.finish();
        for (check, outcome) in report.get_all() {
            info!("  {:<22} {}", check.name(), outcome);
        }
        if let Some(dir) = &plan.report_dir {
            match report.persist(dir) {
                Ok(path) => info!("📝 report written to {}", path.display()),
                Err(err) => error!("failed to persist report: {:#}", err),
            }
        }
        report
    }

    fn start_handshake(&self, report: &ProvisioningReport) -> HandshakeSession {
        let (tx, rx) = mpsc::channel();
        let handle = SerialHandshake::start(Arc::clone(&self.hal), self.plan.factory.clone(), tx);
        let monitor = Monitor {
            events: rx,
            token: handle.stop_token(),
            report: report.clone(),
            observer: self.observer.clone(),
            deadline: Instant::now() + self.plan.handshake_timeout,
            timeout: self.plan.handshake_timeout,
        };
        let monitor = thread::spawn(move || monitor.run());
        HandshakeSession { handle, monitor }
    }

    fn finish_handshake(&self, session: HandshakeSession, report: &ProvisioningReport) {
        // The monitor exits once the reader thread has dropped its sender.
        if session.monitor.join().is_err() {
            error!("handshake monitor panicked");
            session.handle.stop();
        }
        let outcome = session.handle.join();
        if report.get(Check::S3FactoryMode) != CheckOutcome::Pending {
            return;
        }
        let detail = match outcome.error {
            Some(err) => err.to_string(),
            None => format!(
                "factory prompt not seen within {}s",
                self.plan.handshake_timeout.as_secs()
            ),
        };
        warn!("❌ s3 factory mode: {}", detail);
        if let Err(err) =
            report.set_with_detail(Check::S3FactoryMode, CheckOutcome::Fail, Some(detail))
        {
            warn!("report not updated: {}", err);
        }
    }
}

/// Watches handshake events: resolves the factory-mode check on `Active` and
/// stops the session, or stops it at the deadline.
struct Monitor {
    events: Receiver<HandshakeEvent>,
    token: StopToken,
    report: ProvisioningReport,
    observer: Option<Sender<HandshakeEvent>>,
    deadline: Instant,
    timeout: Duration,
}

impl Monitor {
    fn run(self) {
        loop {
            let wait = self.deadline.saturating_duration_since(Instant::now());
            let wait = if wait.is_zero() { DRAIN_POLL } else { wait };
            match self.events.recv_timeout(wait) {
                Ok(event) => {
                    if event == HandshakeEvent::StateChanged(FactoryState::Active) {
                        if let Err(err) = self.report.set(Check::S3FactoryMode, CheckOutcome::Pass)
                        {
                            warn!("report not updated: {}", err);
                        }
                        self.token.request_stop();
                    }
                    if let Some(tx) = &self.observer {
                        let _ = tx.send(event);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.token.request_stop() {
                        warn!(
                            "factory prompt not seen within {}s; closing console",
                            self.timeout.as_secs()
                        );
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }
}

/// Validate `cfg`, resolve the plan and run one unit. Configuration problems
/// are returned before any tool is spawned or port opened.
pub fn provision_unit(
    hal: Arc<dyn StationHal>,
    cfg: StationConfig,
    order_id: Option<String>,
) -> ProvisionResult<ProvisioningReport> {
    let plan = ProvisioningPlan::from_config(cfg, hal.as_ref())?;
    Ok(Sequencer::new(hal, plan).run_unit_provisioning(order_id))
}
