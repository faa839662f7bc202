use fab_core::flash::StepResult;
use fab_core::report::{Check, CheckOutcome, ProvisioningReport};
use log::{info, warn};

pub type StageFn<'a> = Box<dyn Fn() -> StepResult + 'a>;

/// One step of a track and the report check it resolves.
pub struct StageDefinition<'a> {
    pub check: Check,
    pub run: StageFn<'a>,
}

impl<'a> StageDefinition<'a> {
    pub fn new(check: Check, run: impl Fn() -> StepResult + 'a) -> Self {
        Self {
            check,
            run: Box::new(run),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackOutcome {
    pub passed: Vec<Check>,
    /// The stage that stopped the track, if any.
    pub failed: Option<(Check, StepResult)>,
}

impl TrackOutcome {
    pub fn is_ok(&self) -> bool {
        self.failed.is_none()
    }
}

/// Runs a track's stages in order and stops at the first one that does not
/// succeed. Stages after it are never invoked and their checks stay Pending.
pub struct TrackRunner<'r> {
    name: &'static str,
    report: &'r ProvisioningReport,
}

impl<'r> TrackRunner<'r> {
    pub fn new(name: &'static str, report: &'r ProvisioningReport) -> Self {
        Self { name, report }
    }

    pub fn run(&self, stages: &[StageDefinition<'_>]) -> TrackOutcome {
        let mut outcome = TrackOutcome {
            passed: Vec::new(),
            failed: None,
        };
        for stage in stages {
            info!("▶️ [{}] {}", self.name, stage.check);
            let result = (stage.run)();
            if result.is_success() {
                self.resolve(stage.check, CheckOutcome::Pass, None);
                outcome.passed.push(stage.check);
                continue;
            }
            warn!(
                "[{}] {} did not succeed ({:?}); stopping track",
                self.name, stage.check, result.status
            );
            self.resolve(stage.check, CheckOutcome::Fail, result.detail());
            outcome.failed = Some((stage.check, result));
            break;
        }
        outcome
    }

    fn resolve(&self, check: Check, outcome: CheckOutcome, detail: Option<String>) {
        if let Err(err) = self.report.set_with_detail(check, outcome, detail) {
            warn!("[{}] report not updated: {}", self.name, err);
        }
    }
}
