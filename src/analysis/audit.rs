//! Mapping from the audit response schemas to findings.

use serde_json::Value;

use crate::models::{Finding, Severity};

pub(crate) fn array<'a>(value: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    value.get(key).and_then(Value::as_array).into_iter().flatten()
}

pub(crate) fn str_field<'a>(item: &'a Value, key: &str) -> &'a str {
    item.get(key).and_then(Value::as_str).unwrap_or("")
}

fn item_with_reason(item: &Value) -> String {
    let name = str_field(item, "item");
    let reason = str_field(item, "reason");
    if reason.is_empty() {
        name.to_string()
    } else {
        format!("{name}：{reason}")
    }
}

/// Findings shared by the quote and contract audit schemas.
pub(crate) fn map_common_findings(value: &Value, category: &str) -> Vec<Finding> {
    let mut findings = Vec::new();

    for item in array(value, "high_risk_items") {
        findings.push(Finding::new(Severity::Concern, category, item_with_reason(item)));
    }
    for item in array(value, "warning_items") {
        findings.push(Finding::new(Severity::Attention, category, item_with_reason(item)));
    }
    for item in array(value, "overpriced_items") {
        let name = str_field(item, "item");
        let quoted = str_field(item, "quoted");
        let market = str_field(item, "market");
        findings.push(Finding::new(
            Severity::Concern,
            category,
            format!("{name} 报价{quoted}，市场参考{market}"),
        ));
    }
    if let Some(price) = value.get("market_ref_price").and_then(Value::as_str) {
        if !price.is_empty() {
            findings.push(Finding::new(
                Severity::Info,
                category,
                format!("同档次市场参考总价：{price}"),
            ));
        }
    }
    let suggestions: Vec<&str> = array(value, "suggestions")
        .filter_map(Value::as_str)
        .filter(|s| !s.is_empty())
        .collect();
    if !suggestions.is_empty() {
        findings.push(
            Finding::new(Severity::Info, category, "审核建议")
                .with_suggestion(suggestions.join("；")),
        );
    }

    findings
}

/// The single finding a document audit degrades to when the LLM is out.
pub(crate) fn llm_unavailable_finding() -> Finding {
    Finding::new(Severity::Attention, "llm", "智能审核暂不可用").with_suggestion("请稍后重新提交审核")
}

/// Findings only the contract schema produces.
pub(crate) fn map_contract_findings(value: &Value) -> Vec<Finding> {
    let mut findings = Vec::new();

    for item in array(value, "unfair_terms") {
        let term = str_field(item, "term");
        let reason = str_field(item, "reason");
        let mut finding = Finding::new(Severity::Concern, "contract", format!("不利条款：{term}"));
        if !reason.is_empty() {
            finding = finding.with_suggestion(reason);
        }
        findings.push(finding);
    }
    for term in array(value, "missing_terms").filter_map(Value::as_str) {
        findings.push(Finding::new(
            Severity::Attention,
            "contract",
            format!("建议补充条款：{term}"),
        ));
    }
    for item in array(value, "suggested_modifications") {
        let term = str_field(item, "term");
        let suggestion = str_field(item, "suggestion");
        let mut finding = Finding::new(Severity::Info, "contract", format!("修改建议：{term}"));
        if !suggestion.is_empty() {
            finding = finding.with_suggestion(suggestion);
        }
        findings.push(finding);
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_common_mapping_assigns_severities() {
        let value = json!({
            "high_risk_items": [{"item": "防水工程", "reason": "单价偏高"}],
            "warning_items": [{"item": "拆除工程", "reason": "工程量不明"}],
            "overpriced_items": [{"item": "水电", "quoted": "120元/米", "market": "50元/米"}],
            "market_ref_price": "9-11万",
            "suggestions": ["按实测结算", "保留增项凭证"]
        });

        let findings = map_common_findings(&value, "quote");
        assert_eq!(findings.len(), 5);
        assert_eq!(findings[0].severity, Severity::Concern);
        assert!(findings[0].title.contains("防水工程"));
        assert_eq!(findings[1].severity, Severity::Attention);
        assert_eq!(findings[2].severity, Severity::Concern);
        assert_eq!(findings[3].severity, Severity::Info);

        let advice = &findings[4];
        assert_eq!(advice.title, "审核建议");
        assert_eq!(advice.suggestion.as_deref(), Some("按实测结算；保留增项凭证"));
    }

    #[test]
    fn test_empty_arrays_produce_no_findings() {
        let value = json!({
            "high_risk_items": [],
            "warning_items": [],
            "overpriced_items": [],
            "market_ref_price": "",
            "suggestions": []
        });
        assert!(map_common_findings(&value, "quote").is_empty());
    }

    #[test]
    fn test_contract_specific_mapping() {
        let value = json!({
            "unfair_terms": [{"term": "逾期赔偿上限500元", "reason": "违约责任过轻"}],
            "missing_terms": ["增项不得超过合同总价5%"],
            "suggested_modifications": [{"term": "付款节点", "suggestion": "验收合格后付尾款"}]
        });

        let findings = map_contract_findings(&value);
        assert_eq!(findings.len(), 3);
        assert_eq!(findings[0].severity, Severity::Concern);
        assert!(findings[0].title.starts_with("不利条款"));
        assert!(findings[1].title.contains("增项"));
        assert_eq!(findings[2].severity, Severity::Info);
    }
}
