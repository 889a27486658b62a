use super::*;

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use crate::error::{FailureKind, PipelineError, TransferError};
use crate::types::{DescriptorReport, SkipReason, TransferOutcome};

use super::test_helpers::*;

mod worker;

fn controller_in(dir: &TempDir, configure: impl FnOnce(&mut PipelineConfig)) -> PipelineController {
    let mut config = test_config(dir.path());
    configure(&mut config);
    PipelineController::new(config).unwrap()
}

fn outcomes<'a>(reports: &'a [DescriptorReport], name: &str) -> &'a [TransferOutcome] {
    let id = format!("octo/{name}");
    reports
        .iter()
        .find(|r| r.descriptor.id().as_str() == id)
        .map(|r| r.outcomes.as_slice())
        .unwrap_or_else(|| panic!("no report for {id}"))
}
