//! Result persistence module

use crate::browser::PageResponse;
use crate::modules::{CrawlContext, HookError, Module};
use async_trait::async_trait;

/// Records the outcome of a URL row once every other module has run
///
/// Always the last module of a pipeline, so it sees the final response list
/// (including responses appended by earlier modules).
#[derive(Debug, Default)]
pub struct ResultRecorder;

impl ResultRecorder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Module for ResultRecorder {
    fn name(&self) -> &str {
        "result-recorder"
    }

    async fn after_response(
        &mut self,
        ctx: &mut CrawlContext<'_>,
        responses: &mut Vec<PageResponse>,
        final_url: &str,
        repetition: u32,
    ) -> Result<(), HookError> {
        let (code, recorded_url) = match responses.last() {
            Some(last) => (i32::from(last.status), last.final_url.as_str()),
            None => {
                return Err(HookError::Recoverable(
                    "no response to record".to_string(),
                ))
            }
        };

        let recorded = ctx.frontier.complete(ctx.url.id, code, Some(recorded_url))?;
        tracing::debug!(
            task_id = ctx.task.id,
            url_id = ctx.url.id,
            repetition,
            code,
            final_url,
            responses = responses.len(),
            recorded,
            "URL complete"
        );
        Ok(())
    }
}
