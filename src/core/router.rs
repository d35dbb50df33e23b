use regex::Regex;
use serde::Deserialize;
use tracing::{debug, error, warn};

/// 路由规则：文件名模式 -> 目标前缀
#[derive(Debug, Clone)]
pub struct RoutingRule {
    pattern: Regex,
    target: String,
}

impl RoutingRule {
    /// 模式从文件名开头匹配（不要求匹配到结尾）
    pub fn new(pattern: &str, target: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(&format!("^(?:{})", pattern))?,
            target: target.to_string(),
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.pattern.is_match(name)
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

/// 配置中的原始规则项
#[derive(Debug, Clone, Deserialize)]
pub struct RawRule {
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub target_folder: Option<String>,
}

/// 按顺序匹配的路由器，第一个命中的规则生效
#[derive(Debug, Clone, Default)]
pub struct PatternRouter {
    rules: Vec<RoutingRule>,
}

impl PatternRouter {
    pub fn new(rules: Vec<RoutingRule>) -> Self {
        Self { rules }
    }

    /// 解析 JSON 规则列表，丢弃不完整或正则非法的规则
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let raw: Vec<RawRule> = serde_json::from_str(json)?;
        Ok(Self::from_raw(raw))
    }

    pub fn from_raw(raw: Vec<RawRule>) -> Self {
        let mut rules = Vec::with_capacity(raw.len());
        for item in raw {
            let (pattern, target) = match (&item.pattern, &item.target_folder) {
                (Some(p), Some(t)) if !p.is_empty() && !t.is_empty() => (p, t),
                _ => {
                    warn!("无效的规则项: {:?}，已跳过", item);
                    continue;
                }
            };
            match RoutingRule::new(pattern, target) {
                Ok(rule) => rules.push(rule),
                Err(e) => error!("无效的正则表达式 '{}': {}，已跳过", pattern, e),
            }
        }
        debug!("已加载 {} 条路由规则", rules.len());
        Self { rules }
    }

    /// 返回第一个匹配规则的目标前缀
    pub fn route(&self, name: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.matches(name))
            .map(|rule| rule.target())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// 目标 key = 前缀 + "/" + 文件名
pub fn destination_key(target: &str, name: &str) -> String {
    format!("{}/{}", target, name)
}
