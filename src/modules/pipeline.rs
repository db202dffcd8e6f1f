//! Ordered module pipeline

use crate::browser::PageResponse;
use crate::config::Config;
use crate::modules::{
    CrawlContext, HookError, LinkCollector, LinkFilters, Module, ResultRecorder,
};
use crate::storage::SiteRecord;
use thiserror::Error;

/// A hook failure, tagged with the module that raised it
#[derive(Debug, Error)]
#[error("module '{module}' failed: {error}")]
pub struct HookFailure {
    pub module: String,
    pub error: HookError,
}

/// Ordered list of modules invoked by the crawl state machine
///
/// The order is fixed at construction: cookie acceptance, link collection,
/// caller-supplied modules, and the result recorder last of all.
pub struct Pipeline {
    modules: Vec<Box<dyn Module>>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Builds the standard pipeline for a configuration plus caller modules
    pub fn from_config(config: &Config, custom: Vec<Box<dyn Module>>) -> Self {
        let mut builder = Self::builder();
        if config.modules.collect_links {
            builder = builder.link_collection(LinkCollector::new());
        }
        for module in custom {
            builder = builder.boxed(module);
        }
        builder.build()
    }

    /// Module names in invocation order
    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Collects every module's admission predicate for one task
    pub fn link_filters(&self, site: &SiteRecord, config: &Config) -> LinkFilters {
        LinkFilters::new(
            self.modules
                .iter()
                .filter_map(|m| m.link_filter(site, config))
                .collect(),
        )
    }

    /// Runs all pre-navigation hooks; stops at the first failure
    pub async fn before_navigate(&mut self, ctx: &mut CrawlContext<'_>) -> Result<(), HookFailure> {
        for module in self.modules.iter_mut() {
            if let Err(error) = module.before_navigate(ctx).await {
                return Err(HookFailure {
                    module: module.name().to_string(),
                    error,
                });
            }
        }
        Ok(())
    }

    /// Runs all post-navigation hooks; stops at the first failure
    pub async fn after_response(
        &mut self,
        ctx: &mut CrawlContext<'_>,
        responses: &mut Vec<PageResponse>,
        final_url: &str,
        repetition: u32,
    ) -> Result<(), HookFailure> {
        for module in self.modules.iter_mut() {
            if let Err(error) = module
                .after_response(ctx, responses, final_url, repetition)
                .await
            {
                return Err(HookFailure {
                    module: module.name().to_string(),
                    error,
                });
            }
        }
        Ok(())
    }
}

/// Assembles a [`Pipeline`] in its fixed slot order
#[derive(Default)]
pub struct PipelineBuilder {
    cookie_acceptance: Option<Box<dyn Module>>,
    link_collection: Option<Box<dyn Module>>,
    custom: Vec<Box<dyn Module>>,
}

impl PipelineBuilder {
    /// Sets the module that runs first (cookie-banner handling)
    pub fn cookie_acceptance(mut self, module: impl Module + 'static) -> Self {
        self.cookie_acceptance = Some(Box::new(module));
        self
    }

    /// Sets the link discovery module
    pub fn link_collection(mut self, module: impl Module + 'static) -> Self {
        self.link_collection = Some(Box::new(module));
        self
    }

    /// Appends a caller-supplied module
    pub fn module(self, module: impl Module + 'static) -> Self {
        self.boxed(Box::new(module))
    }

    pub fn boxed(mut self, module: Box<dyn Module>) -> Self {
        self.custom.push(module);
        self
    }

    /// Finishes the pipeline; the result recorder is always appended last
    pub fn build(self) -> Pipeline {
        let mut modules: Vec<Box<dyn Module>> = Vec::with_capacity(self.custom.len() + 3);
        modules.extend(self.cookie_acceptance);
        modules.extend(self.link_collection);
        modules.extend(self.custom);
        modules.push(Box::new(ResultRecorder::new()));
        Pipeline { modules }
    }
}
