//! Keyword rule matcher.
//!
//! An ordered table of `{category, keywords, answer}`. A question matches
//! the first category, in table order, that has any keyword occurring in
//! the lowercased question. The built-in table checks library, scholarship,
//! dormitory, canteen and course in that order, so "图书馆和食堂" resolves
//! to the library answer.
//!
//! The server uses the matcher as an optional pre-filter in front of the
//! query service and as the whole answer path in offline mode.

use serde::Serialize;

use crate::config::RuleConfig;

/// Reply when no rule matches in offline mode.
pub const FALLBACK_HINT: &str =
    "我主要能回答关于图书馆、奖学金、食堂、宿舍、课程等方面的问题。请问您想了解哪方面的具体信息？";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub category: String,
    /// Stored lowercased.
    pub keywords: Vec<String>,
    pub answer: String,
}

impl Rule {
    pub fn new(category: &str, keywords: &[&str], answer: &str) -> Self {
        Self {
            category: category.to_string(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            answer: answer.to_string(),
        }
    }

    fn matches(&self, question: &str) -> bool {
        self.keywords
            .iter()
            .any(|k| !k.is_empty() && question.contains(k.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleMatch {
    pub category: String,
    pub answer: String,
}

#[derive(Debug, Clone)]
pub struct RuleMatcher {
    rules: Vec<Rule>,
}

impl Default for RuleMatcher {
    fn default() -> Self {
        Self {
            rules: default_rules(),
        }
    }
}

impl RuleMatcher {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Use `configured` when non-empty, the built-in table otherwise.
    pub fn from_config(configured: &[RuleConfig]) -> Self {
        if configured.is_empty() {
            return Self::default();
        }
        let rules = configured
            .iter()
            .map(|r| Rule {
                category: r.category.clone(),
                keywords: r
                    .keywords
                    .iter()
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect(),
                answer: r.answer.clone(),
            })
            .collect();
        Self::new(rules)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn match_question(&self, question: &str) -> Option<RuleMatch> {
        let question = question.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&question))
            .map(|rule| RuleMatch {
                category: rule.category.clone(),
                answer: rule.answer.clone(),
            })
    }
}

/// The built-in campus rule table, in match order.
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            "library",
            &["图书馆", "借书", "还书", "阅览室", "自习"],
            "图书馆开放时间：周一至周日 8:00-22:00\n位置：校园东区主楼\n服务：借书、还书、电子资源、自习室",
        ),
        Rule::new(
            "scholarship",
            &["奖学金", "助学金", "资助", "学费", "奖金"],
            "奖学金申请条件：\n- 成绩平均分85分以上\n- 无违纪记录\n- 每学期初申请\n申请地点：学生事务处",
        ),
        Rule::new(
            "dormitory",
            &["宿舍", "寝室", "住宿", "宿管", "宿舍楼"],
            "宿舍信息：\n- 关门时间：23:00（周末24:00）\n- 报修：联系宿管阿姨\n- 水电费：每月初缴纳",
        ),
        Rule::new(
            "canteen",
            &["食堂", "餐厅", "吃饭", "餐饮", "饭菜"],
            "食堂信息：\n- 开放时间：6:30-20:00\n- 位置：第一食堂（东区）、第二食堂（西区）\n- 支付方式：校园卡、微信、支付宝",
        ),
        Rule::new(
            "course",
            &["课程", "选课", "上课", "教务", "专业课"],
            "课程相关：\n- 选课时间：学期开始前两周\n- 查询系统：教务在线\n- 联系方式：各学院教务办公室",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_category_matches() {
        let matcher = RuleMatcher::default();
        for (question, category) in [
            ("图书馆几点开门", "library"),
            ("怎么申请助学金", "scholarship"),
            ("寝室几点关门", "dormitory"),
            ("哪里吃饭", "canteen"),
            ("什么时候选课", "course"),
        ] {
            assert_eq!(
                matcher.match_question(question).unwrap().category,
                category,
                "{}",
                question
            );
        }
    }

    #[test]
    fn test_first_category_wins() {
        let matcher = RuleMatcher::default();
        let m = matcher.match_question("图书馆和食堂几点开").unwrap();
        assert_eq!(m.category, "library");
        assert!(m.answer.starts_with("图书馆开放时间"));

        let m = matcher.match_question("宿舍附近的食堂").unwrap();
        assert_eq!(m.category, "dormitory");
    }

    #[test]
    fn test_no_match() {
        assert!(RuleMatcher::default().match_question("今天天气怎么样").is_none());
        assert!(RuleMatcher::default().match_question("").is_none());
    }

    #[test]
    fn test_configured_rules_case_insensitive() {
        let matcher = RuleMatcher::from_config(&[RuleConfig {
            category: "wifi".to_string(),
            keywords: vec!["WiFi".to_string(), " ".to_string()],
            answer: "SSID: campus".to_string(),
        }]);
        assert_eq!(matcher.rules().len(), 1);
        assert_eq!(matcher.rules()[0].keywords, vec!["wifi"]);
        assert_eq!(
            matcher.match_question("宿舍WIFI密码").unwrap().answer,
            "SSID: campus"
        );
        assert!(matcher.match_question("图书馆").is_none());
    }
}
