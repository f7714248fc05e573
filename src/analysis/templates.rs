//! Prompt templates and their output schemas.
//!
//! Each template binds a prompt to the JSON shape the model must
//! return. Adapters render prompts here and validate responses against
//! the same template, so a vendor swap cannot silently change the
//! contract. The acceptance prompt version participates in acceptance
//! fingerprints.

use serde_json::Value;

use crate::models::Stage;

/// Bumped whenever an acceptance checklist materially changes, which
/// recomputes all acceptance fingerprints.
pub const ACCEPTANCE_PROMPT_VERSION: &str = "2";

/// Appended to the prompt when the first response fails validation.
pub const REPAIR_SUFFIX: &str =
    "\n\n你上一次的输出不符合要求的JSON结构。请严格按照上述JSON结构重新输出，只输出合法JSON，不要包含任何其他文字或代码块标记。";

/// Output shape a template's response is validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Schema {
    QuoteAudit,
    ContractAudit,
    Acceptance,
}

/// A prompt bound to an output schema.
#[derive(Debug)]
pub struct Template {
    pub id: &'static str,
    prompt: &'static str,
    variables: &'static [&'static str],
    schema: Schema,
}

const QUOTE_AUDIT_PROMPT: &str = r#"你是装修行业的资深造价审核员。以下是从用户上传的装修报价单中识别出的文字内容：

{text}

用户填写的装修总价：{total_price}

请逐项审核该报价单，重点检查：单价异常偏高的项目、缺失的常见必要项目、
表述模糊可能引起增项的项目、与市场参考价差异较大的项目。

只输出如下结构的JSON，不要输出其他内容：
{"risk_score": 0到100的整数, "high_risk_items": [{"item": "项目名", "reason": "原因"}], "warning_items": [{"item": "项目名", "reason": "原因"}], "missing_items": ["缺失项目名"], "overpriced_items": [{"item": "项目名", "quoted": "报价", "market": "市场价"}], "market_ref_price": "同档次市场参考总价区间", "suggestions": ["给用户的建议"]}"#;

const CONTRACT_AUDIT_PROMPT: &str = r#"你是熟悉家装合同纠纷的法律顾问。以下是从用户上传的装修合同中识别出的文字内容：

{text}

请审核该合同，重点检查：对业主明显不利的条款、缺失的关键条款（工期、
付款节点、违约责任、保修、增项限制）、表述模糊的条款。

只输出如下结构的JSON，不要输出其他内容：
{"risk_score": 0到100的整数, "high_risk_items": [{"item": "条款", "reason": "原因"}], "warning_items": [{"item": "条款", "reason": "原因"}], "missing_items": ["缺失条款"], "unfair_terms": [{"term": "条款原文", "reason": "不利原因"}], "missing_terms": ["建议补充的条款"], "suggested_modifications": [{"term": "条款", "suggestion": "修改建议"}], "overpriced_items": [], "market_ref_price": "", "suggestions": ["给用户的建议"]}"#;

const ACCEPTANCE_PROMPT: &str = r#"你是装修监理。下面是一张{stage_name}阶段的施工现场照片：

{image_url}

请按以下验收要点逐项检查照片中可见的内容：
{checklist}

照片中无法判断的要点标记为 unclear。只输出如下结构的JSON，不要输出其他内容：
{"overall_score": 0到100的整数, "items": [{"item": "验收要点", "verdict": "pass或unclear或fail", "note": "说明"}]}"#;

static TEMPLATES: &[Template] = &[
    Template {
        id: "quote_audit",
        prompt: QUOTE_AUDIT_PROMPT,
        variables: &["text", "total_price"],
        schema: Schema::QuoteAudit,
    },
    Template {
        id: "contract_audit",
        prompt: CONTRACT_AUDIT_PROMPT,
        variables: &["text"],
        schema: Schema::ContractAudit,
    },
    Template {
        id: "acceptance_S00",
        prompt: ACCEPTANCE_PROMPT,
        variables: &["stage_name", "image_url", "checklist"],
        schema: Schema::Acceptance,
    },
    Template {
        id: "acceptance_S01",
        prompt: ACCEPTANCE_PROMPT,
        variables: &["stage_name", "image_url", "checklist"],
        schema: Schema::Acceptance,
    },
    Template {
        id: "acceptance_S02",
        prompt: ACCEPTANCE_PROMPT,
        variables: &["stage_name", "image_url", "checklist"],
        schema: Schema::Acceptance,
    },
    Template {
        id: "acceptance_S03",
        prompt: ACCEPTANCE_PROMPT,
        variables: &["stage_name", "image_url", "checklist"],
        schema: Schema::Acceptance,
    },
    Template {
        id: "acceptance_S04",
        prompt: ACCEPTANCE_PROMPT,
        variables: &["stage_name", "image_url", "checklist"],
        schema: Schema::Acceptance,
    },
    Template {
        id: "acceptance_S05",
        prompt: ACCEPTANCE_PROMPT,
        variables: &["stage_name", "image_url", "checklist"],
        schema: Schema::Acceptance,
    },
];

/// Look up a template by id.
pub fn template(id: &str) -> Option<&'static Template> {
    TEMPLATES.iter().find(|t| t.id == id)
}

/// Template id for a stage's acceptance check.
pub fn acceptance_template_id(stage: Stage) -> String {
    format!("acceptance_{}", stage.code())
}

/// Checklist lines for a stage, one per line.
pub fn stage_checklist(stage: Stage) -> &'static str {
    match stage {
        Stage::Material => {
            "1. 材料品牌型号与合同约定一致\n2. 环保等级标识清晰可见\n3. 板材无破损、无受潮变形\n4. 防水防火辅材进场齐全"
        }
        Stage::Plumbing => {
            "1. 强弱电线管间距不小于30厘米\n2. 水管走向横平竖直，打压测试无渗漏\n3. 电线分色规范，火零地可区分\n4. 线管转角使用弯管器，无死弯\n5. 暗盒安装平整，深度合适"
        }
        Stage::Carpentry => {
            "1. 瓷砖无明显空鼓，边角无破损\n2. 墙面垂直度与平整度达标\n3. 卫生间防水层完整，闭水试验合格\n4. 地漏处坡度正确，排水顺畅"
        }
        Stage::Woodwork => {
            "1. 吊顶龙骨间距均匀、固定牢固\n2. 柜体封边平整，无脱胶\n3. 石膏板接缝留缝并做防裂处理\n4. 木作整体垂直水平，开合顺畅"
        }
        Stage::Painting => {
            "1. 墙面平整，无明显色差\n2. 阴阳角顺直\n3. 乳胶漆无流坠、起皮、开裂\n4. 木器漆表面光滑，无刷痕"
        }
        Stage::Installation => {
            "1. 洁具五金安装牢固、无松动\n2. 开关插座通电正常，位置准确\n3. 门窗开合顺畅，密封良好\n4. 成品保护到位，现场清洁"
        }
    }
}

impl Template {
    /// Fill the prompt's placeholders. Every declared variable must be
    /// present in `variables`.
    pub fn render(&self, variables: &Value) -> Result<String, String> {
        let mut prompt = self.prompt.to_string();
        for key in self.variables {
            let value = variables
                .get(key)
                .ok_or_else(|| format!("missing template variable: {key}"))?;
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            prompt = prompt.replace(&format!("{{{key}}}"), &text);
        }
        Ok(prompt)
    }

    /// Validate a model response against this template's schema.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        let obj = value.as_object().ok_or("response is not a JSON object")?;

        let require_number = |key: &str| -> Result<(), String> {
            match obj.get(key) {
                Some(v) if v.is_u64() || v.is_i64() || v.is_f64() => Ok(()),
                Some(_) => Err(format!("{key} is not a number")),
                None => Err(format!("missing field: {key}")),
            }
        };
        let require_array = |key: &str| -> Result<(), String> {
            match obj.get(key) {
                Some(v) if v.is_array() => Ok(()),
                Some(_) => Err(format!("{key} is not an array")),
                None => Err(format!("missing field: {key}")),
            }
        };

        match self.schema {
            Schema::QuoteAudit => {
                require_number("risk_score")?;
                for key in ["high_risk_items", "warning_items", "missing_items", "overpriced_items", "suggestions"] {
                    require_array(key)?;
                }
                Ok(())
            }
            Schema::ContractAudit => {
                require_number("risk_score")?;
                for key in [
                    "high_risk_items",
                    "warning_items",
                    "missing_items",
                    "unfair_terms",
                    "missing_terms",
                    "suggested_modifications",
                    "suggestions",
                ] {
                    require_array(key)?;
                }
                Ok(())
            }
            Schema::Acceptance => {
                require_number("overall_score")?;
                require_array("items")?;
                for item in value["items"].as_array().into_iter().flatten() {
                    let verdict = item
                        .get("verdict")
                        .and_then(|v| v.as_str())
                        .ok_or("item missing verdict")?;
                    if !matches!(verdict, "pass" | "unclear" | "fail") {
                        return Err(format!("invalid verdict: {verdict}"));
                    }
                    if item.get("item").and_then(|v| v.as_str()).is_none() {
                        return Err("item missing name".to_string());
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_every_stage_has_a_template() {
        for stage in Stage::all() {
            let id = acceptance_template_id(*stage);
            assert!(template(&id).is_some(), "missing template {id}");
            assert!(!stage_checklist(*stage).is_empty());
        }
    }

    #[test]
    fn test_render_fills_placeholders() {
        let t = template("quote_audit").unwrap();
        let prompt = t
            .render(&json!({"text": "水电改造 5000元", "total_price": 80000}))
            .unwrap();
        assert!(prompt.contains("水电改造 5000元"));
        assert!(prompt.contains("80000"));
        assert!(!prompt.contains("{text}"));
    }

    #[test]
    fn test_render_missing_variable_errors() {
        let t = template("quote_audit").unwrap();
        let err = t.render(&json!({"text": "x"})).unwrap_err();
        assert!(err.contains("total_price"));
    }

    #[test]
    fn test_quote_audit_validation() {
        let t = template("quote_audit").unwrap();
        let good = json!({
            "risk_score": 42,
            "high_risk_items": [],
            "warning_items": [],
            "missing_items": [],
            "overpriced_items": [],
            "market_ref_price": "8-10万",
            "suggestions": []
        });
        assert!(t.validate(&good).is_ok());

        let bad = json!({"risk_score": "高", "high_risk_items": []});
        assert!(t.validate(&bad).is_err());
    }

    #[test]
    fn test_acceptance_validation_checks_verdicts() {
        let t = template("acceptance_S01").unwrap();
        let good = json!({
            "overall_score": 88,
            "items": [
                {"item": "水管打压", "verdict": "pass"},
                {"item": "强弱电间距", "verdict": "unclear", "note": "照片角度受限"}
            ]
        });
        assert!(t.validate(&good).is_ok());

        let bad = json!({
            "overall_score": 88,
            "items": [{"item": "水管打压", "verdict": "maybe"}]
        });
        assert!(t.validate(&bad).is_err());
    }

    #[test]
    fn test_contract_audit_requires_term_arrays() {
        let t = template("contract_audit").unwrap();
        let missing = json!({
            "risk_score": 10,
            "high_risk_items": [],
            "warning_items": [],
            "missing_items": [],
            "suggestions": []
        });
        let err = t.validate(&missing).unwrap_err();
        assert!(err.contains("unfair_terms"));
    }
}
