use crate::catalog::{
    CategoryRequirements, CategoryResolution, CategoryResolver, RequirementsResolver,
};
use crate::catalog::resolver::{UNBRANDED, brand_from_specifications};
use crate::measurements::package_from_specifications;
use crate::models::{
    FailureStage, ListingReport, ListingResult, ProductRecord, StageFailure, StageReport,
};
use crate::pricing::{self, PriceQuote, PricingSettings, parse_money};
use crate::publisher::{ListingDraft, ListingPublisher, filter_images};
use crate::sanitize::{SanitizedProduct, sanitize_product};
use crate::store::{ListingStore, StoredListing};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

/// Runs one product record at a time through sanitize, price, category,
/// requirements and the publish steps.
#[derive(Clone)]
pub struct Pipeline {
    pricing: Arc<PricingSettings>,
    resolver: Arc<CategoryResolver>,
    requirements: Arc<RequirementsResolver>,
    publisher: Arc<ListingPublisher>,
    store: Arc<dyn ListingStore>,
}

#[derive(Default)]
struct RecordSummary {
    title: Option<String>,
    brand: Option<String>,
    needs_review: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequirementsPreview {
    pub requirements: CategoryRequirements,
    pub aspects: BTreeMap<String, Vec<String>>,
}

impl Pipeline {
    pub fn new(
        pricing: Arc<PricingSettings>,
        resolver: Arc<CategoryResolver>,
        requirements: Arc<RequirementsResolver>,
        publisher: Arc<ListingPublisher>,
        store: Arc<dyn ListingStore>,
    ) -> Self {
        Self {
            pricing,
            resolver,
            requirements,
            publisher,
            store,
        }
    }

    pub fn validate(record: &ProductRecord) -> Result<(), PipelineError> {
        if record.id.trim().is_empty() {
            return Err(PipelineError::invalid_input("validate", "record id must not be empty"));
        }
        if record.title.trim().is_empty() {
            return Err(PipelineError::invalid_input(
                "validate",
                format!("record `{}` has an empty title", record.id),
            ));
        }
        Ok(())
    }

    pub fn stage_sanitize(&self, record: &ProductRecord) -> SanitizedProduct {
        sanitize_product(record)
    }

    pub fn stage_price(&self, record: &ProductRecord) -> PriceQuote {
        pricing::quote(
            parse_money(&record.price),
            parse_money(&record.delivery_fee),
            record.source,
            record.price_multiplier,
            &self.pricing,
        )
    }

    pub async fn stage_resolve_category(&self, record: &ProductRecord) -> CategoryResolution {
        self.resolver.resolve(&sanitize_product(record)).await
    }

    pub async fn stage_requirements(
        &self,
        record: &ProductRecord,
        category_id: &str,
        include_recommended: bool,
    ) -> Result<RequirementsPreview, PipelineError> {
        let sanitized = sanitize_product(record);
        let requirements = self
            .requirements
            .get_requirements(category_id)
            .await
            .map_err(|err| PipelineError::internal("requirements", err.to_string()))?;
        let brand = brand_from_specifications(&sanitized).unwrap_or_else(|| UNBRANDED.to_string());
        let aspects = self
            .requirements
            .fill(&sanitized, &requirements, include_recommended, &brand)
            .await;
        Ok(RequirementsPreview {
            requirements,
            aspects,
        })
    }

    /// Strictly sequential; one report per record, in input order.
    pub async fn run_batch(&self, records: &[ProductRecord]) -> Vec<ListingReport> {
        let mut reports = Vec::with_capacity(records.len());
        for record in records {
            reports.push(self.process(record).await);
        }
        let succeeded = reports.iter().filter(|r| r.result.is_success()).count();
        info!(
            target = "relister.pipeline",
            records = reports.len(),
            succeeded,
            failed = reports.len() - succeeded,
            "batch_completed"
        );
        reports
    }

    /// Never fails as a whole: any stage error becomes a failed result for this record.
    pub async fn process(&self, record: &ProductRecord) -> ListingReport {
        let mut stages = Vec::new();
        let mut summary = RecordSummary::default();

        let sanitized = capture_stage("sanitize", &mut stages, async {
            let sanitized = sanitize_product(record);
            let counts: BTreeMap<&'static str, usize> = sanitized
                .violation_counts()
                .into_iter()
                .map(|(kind, count)| (kind.as_str(), count))
                .collect();
            Ok::<_, Infallible>(StageOutcome::new(
                sanitized,
                json!({ "violations": counts }),
            ))
        })
        .await
        .unwrap_or_else(|never| match never {});
        if !sanitized.violations.is_empty() {
            for (kind, count) in sanitized.violation_counts() {
                crate::metrics::violations_found(kind.as_str(), count);
            }
            info!(
                target = "relister.pipeline",
                sku = %record.id,
                violations = sanitized.violations.len(),
                kinds = ?sanitized.violation_counts(),
                "policy_violations_stripped"
            );
        }

        let result = match self
            .list(record, &sanitized, &mut stages, &mut summary)
            .await
        {
            Ok(result) => result,
            Err(failure) => {
                warn!(
                    target = "relister.pipeline",
                    sku = %record.id,
                    stage = failure.stage.as_str(),
                    error = %failure.message,
                    "listing_failed"
                );
                failure.into()
            }
        };
        match &result {
            ListingResult::Success { .. } => crate::metrics::listing_outcome("success", None),
            ListingResult::Failed { stage, .. } => {
                crate::metrics::listing_outcome("failed", Some(stage.as_str()))
            }
        }

        let stored_title = summary.title.clone().unwrap_or_else(|| sanitized.title.clone());
        let stored = StoredListing::new(
            &record.id,
            &stored_title,
            record.source,
            parse_money(&record.price),
            result.clone(),
        );
        if let Err(err) = self.store.upsert(stored).await {
            warn!(
                target = "relister.store",
                sku = %record.id,
                error = %err,
                "listing_history_write_failed"
            );
        }

        ListingReport {
            sku: record.id.clone(),
            result,
            title: summary.title,
            brand: summary.brand,
            needs_review: summary.needs_review,
            violations: sanitized.violations.len(),
            stages,
        }
    }

    async fn list(
        &self,
        record: &ProductRecord,
        sanitized: &SanitizedProduct,
        stages: &mut Vec<StageReport>,
        summary: &mut RecordSummary,
    ) -> Result<ListingResult, StageFailure> {
        let quote = capture_stage("pricing", stages, async {
            let quote = self.stage_price(record);
            if quote.price <= 0.0 {
                return Err(StageFailure::new(
                    FailureStage::Pricing,
                    format!("source price `{}` is missing or not positive", record.price),
                ));
            }
            Ok(StageOutcome::new(quote, json!(quote)))
        })
        .await?;

        let resolution = capture_stage("category", stages, async {
            let resolution = self.resolver.resolve(sanitized).await;
            let output = json!(resolution);
            Ok::<_, Infallible>(StageOutcome::new(resolution, output))
        })
        .await
        .unwrap_or_else(|never| match never {});
        summary.title = Some(resolution.optimized_title.clone());
        summary.brand = Some(resolution.brand.clone());
        summary.needs_review = resolution.needs_review;

        let aspects = capture_stage("requirements", stages, async {
            let requirements = self
                .requirements
                .get_requirements(&resolution.category_id)
                .await
                .map_err(|err| StageFailure::new(FailureStage::Requirements, err.to_string()))?;
            let aspects = self
                .requirements
                .fill(sanitized, &requirements, true, &resolution.brand)
                .await;
            let output = json!({
                "required": requirements.required.len(),
                "recommended": requirements.recommended.len(),
                "optional": requirements.optional.len(),
                "aspects": aspects,
            });
            Ok::<_, StageFailure>(StageOutcome::new(aspects, output))
        })
        .await?;

        let draft = ListingDraft {
            sku: record.id.clone(),
            title: resolution.optimized_title.clone(),
            description_html: render_description(sanitized, &resolution.optimized_title),
            brand: Some(resolution.brand.clone()),
            category_id: resolution.category_id.clone(),
            aspects,
            image_urls: filter_images(&record.images),
            package: package_from_specifications(&sanitized.specifications),
            price: quote.price,
        };

        capture_stage("inventory", stages, async {
            self.publisher.put_inventory_item(&draft).await?;
            Ok::<_, StageFailure>(StageOutcome::new(
                (),
                json!({
                    "images": draft.image_urls.len(),
                    "aspects": draft.aspects.len(),
                    "package": draft.package,
                }),
            ))
        })
        .await?;

        capture_stage("location", stages, async {
            let status = self.publisher.ensure_location().await?;
            Ok::<_, StageFailure>(StageOutcome::new((), json!({ "location": status })))
        })
        .await?;

        let offer = capture_stage("offer", stages, async {
            let offer = self.publisher.upsert_offer(&draft).await?;
            let output = json!({ "offer_id": offer.offer_id, "reused": offer.reused });
            Ok::<_, StageFailure>(StageOutcome::new(offer, output))
        })
        .await?;

        let listing_id = capture_stage("publish", stages, async {
            let listing_id = self.publisher.publish_offer(&draft.sku, &offer.offer_id).await?;
            let output = json!({ "listing_id": listing_id });
            Ok::<_, StageFailure>(StageOutcome::new(listing_id, output))
        })
        .await?;

        info!(
            target = "relister.pipeline",
            sku = %record.id,
            category_id = %resolution.category_id,
            offer_id = %offer.offer_id,
            listing_id = %listing_id,
            price = quote.price,
            "listing_published"
        );
        Ok(ListingResult::Success {
            category_id: resolution.category_id,
            category_name: resolution.category_name,
            offer_id: offer.offer_id,
            listing_id,
            price: quote.price,
        })
    }
}

async fn capture_stage<T, E, Fut>(
    name: &'static str,
    stages: &mut Vec<StageReport>,
    fut: Fut,
) -> Result<T, E>
where
    E: Display,
    Fut: Future<Output = Result<StageOutcome<T>, E>>,
{
    let started = Instant::now();
    let outcome = fut.await;
    let elapsed_ms = started.elapsed().as_millis();
    crate::metrics::stage_elapsed(name, elapsed_ms);
    match outcome {
        Ok(outcome) => {
            stages.push(StageReport::new(name, elapsed_ms, outcome.output));
            Ok(outcome.value)
        }
        Err(err) => {
            stages.push(StageReport::new(name, elapsed_ms, json!({ "error": err.to_string() })));
            Err(err)
        }
    }
}

/// HTML body for the listing: description, bullet list, then a specification table.
pub fn render_description(product: &SanitizedProduct, fallback_title: &str) -> String {
    let mut html = String::new();
    if !product.description.trim().is_empty() {
        html.push_str(&format!("<p>{}</p>", escape_html(product.description.trim())));
    }
    if !product.bullet_points.is_empty() {
        html.push_str("<ul>");
        for bullet in &product.bullet_points {
            html.push_str(&format!("<li>{}</li>", escape_html(bullet)));
        }
        html.push_str("</ul>");
    }
    if !product.specifications.is_empty() {
        html.push_str("<table>");
        for (key, value) in &product.specifications {
            html.push_str(&format!(
                "<tr><th>{}</th><td>{}</td></tr>",
                escape_html(key),
                escape_html(value)
            ));
        }
        html.push_str("</table>");
    }
    if html.is_empty() {
        html = format!("<p>{}</p>", escape_html(fallback_title));
    }
    html
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    NotFound,
    Internal,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::InvalidInput,
        }
    }

    pub fn not_found(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::NotFound,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Internal,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}
