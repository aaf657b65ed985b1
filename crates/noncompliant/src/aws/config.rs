//! AWS Config compliance lookups.
use crate::aws::{error::ClassifyExt, Aws};

/// The verdict of one AWS Config rule on one resource.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RuleCompliance {
    pub rule_name: String,
    /// `COMPLIANT`, `NON_COMPLIANT`, `NOT_APPLICABLE` or
    /// `INSUFFICIENT_DATA`.
    pub compliance: String,
}

/// Every evaluation AWS Config holds for the given resource.
///
/// Empty when the recorder has not evaluated the resource yet, which is
/// normal for a few minutes after it was created.
pub async fn compliance_of(
    aws: &Aws,
    resource_type: &str,
    resource_id: &str,
) -> anyhow::Result<Vec<RuleCompliance>> {
    let client = aws_sdk_config::Client::new(aws.as_ref());
    let mut results = vec![];
    let mut next_token: Option<String> = None;
    loop {
        let page = client
            .get_compliance_details_by_resource()
            .resource_type(resource_type)
            .resource_id(resource_id)
            .set_next_token(next_token.take())
            .send()
            .await
            .classify("GetComplianceDetailsByResource")?;
        for evaluation in page.evaluation_results() {
            let rule_name = evaluation
                .evaluation_result_identifier()
                .and_then(|id| id.evaluation_result_qualifier())
                .and_then(|q| q.config_rule_name())
                .unwrap_or("unknown rule");
            let compliance = evaluation
                .compliance_type()
                .map(|c| c.as_str())
                .unwrap_or("UNKNOWN");
            results.push(RuleCompliance {
                rule_name: rule_name.to_owned(),
                compliance: compliance.to_owned(),
            });
        }
        match page.next_token() {
            Some(token) if !token.is_empty() => next_token = Some(token.to_owned()),
            _ => break,
        }
    }
    Ok(results)
}
