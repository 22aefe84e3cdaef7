use super::FragmentImport;
use crate::external::{DiscoveredFragment, FragmentDiscovery};
use crate::policy::ContainerPolicy;
use crate::scanner::{extract_containers, extract_svn};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{info, instrument, warn};

/// 对每个发现的片段做出的判定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentDecision {
    /// 被某个导入声明接受并消耗
    Accepted { feed: String, svn: u64 },
    /// feed 不在剩余的导入声明中
    Untrusted { feed: String },
    /// 版本低于声明的最小值，回退为内联策略
    TooOld {
        feed: String,
        svn: u64,
        minimum_svn: u64,
    },
    /// 片段文本中找不到 svn
    MissingSvn { feed: String },
    /// 无法拉取或无法解析
    Unavailable { source: String, reason: String },
}

/// 解析结果：每个声明的容器恰好落在 `inline` 或 `covered` 之一。
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub inline: Vec<ContainerPolicy>,
    pub covered: Vec<ContainerPolicy>,
    /// 被接受片段中的全部容器记录
    pub fragment_containers: Vec<Value>,
    pub decisions: Vec<FragmentDecision>,
}

impl Resolution {
    pub fn covered_ids(&self) -> BTreeSet<&str> {
        self.covered.iter().map(ContainerPolicy::id).collect()
    }
}

/// 根据片段导入声明，找出哪些容器已经由签名片段覆盖。
pub struct FragmentResolver<'a> {
    discovery: &'a dyn FragmentDiscovery,
}

impl<'a> FragmentResolver<'a> {
    pub fn new(discovery: &'a dyn FragmentDiscovery) -> Self {
        Self { discovery }
    }

    #[instrument(skip_all, fields(containers = containers.len(), imports = imports.len()))]
    pub fn resolve(
        &self,
        containers: Vec<ContainerPolicy>,
        imports: &[FragmentImport],
    ) -> Resolution {
        let mut remaining = imports.to_vec();
        let mut accepted_texts: Vec<String> = Vec::new();
        let mut decisions = Vec::new();

        let mut images: Vec<&str> = Vec::new();
        for container in &containers {
            if !images.contains(&container.image()) {
                images.push(container.image());
            }
        }

        for image in images {
            let attached = match self.discovery.pull_image_attached_fragments(image) {
                Ok(attached) => attached,
                Err(e) => {
                    warn!(image, error = %e, "fragment discovery failed, keeping image inline");
                    decisions.push(FragmentDecision::Unavailable {
                        source: image.to_string(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            for fragment in attached {
                if let Some(text) = admit(&mut remaining, fragment, &mut decisions) {
                    accepted_texts.push(text);
                }
            }
        }

        if !remaining.is_empty() {
            match self.discovery.pull_standalone_fragments(&remaining) {
                Ok(standalone) => {
                    for fragment in standalone {
                        if let Some(text) = admit(&mut remaining, fragment, &mut decisions) {
                            accepted_texts.push(text);
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "standalone fragment discovery failed");
                    decisions.push(FragmentDecision::Unavailable {
                        source: "standalone".to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let mut fragment_containers = Vec::new();
        for text in &accepted_texts {
            match extract_containers(text) {
                Ok(records) => fragment_containers.extend(records),
                Err(e) => {
                    warn!(error = %e, "accepted fragment could not be scanned, ignoring its containers");
                    decisions.push(FragmentDecision::Unavailable {
                        source: "fragment".to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let coverage: BTreeSet<&str> = fragment_containers
            .iter()
            .filter_map(|record| record.get("id").and_then(Value::as_str))
            .collect();
        let (covered, inline): (Vec<_>, Vec<_>) = containers
            .into_iter()
            .partition(|c| coverage.contains(c.id()));
        if !covered.is_empty() {
            info!(covered = covered.len(), "containers covered by fragments");
        }

        Resolution {
            inline,
            covered,
            fragment_containers,
            decisions,
        }
    }
}

/// 用剩余的导入声明判定一个片段；接受时消耗对应的导入并返回片段文本。
/// 镜像附带片段与独立片段走同一套 feed / svn 检查。
fn admit(
    remaining: &mut Vec<FragmentImport>,
    fragment: DiscoveredFragment,
    decisions: &mut Vec<FragmentDecision>,
) -> Option<String> {
    let DiscoveredFragment { text, feed } = fragment;
    let Some(idx) = remaining.iter().position(|i| i.feed == feed) else {
        warn!(feed = %feed, "fragment feed not in list of feeds to use, skipping fragment");
        decisions.push(FragmentDecision::Untrusted { feed });
        return None;
    };
    let minimum_svn = remaining[idx].minimum_svn;
    let Some(svn) = extract_svn(&text) else {
        warn!(feed = %feed, "fragment declares no svn, skipping fragment");
        decisions.push(FragmentDecision::MissingSvn { feed });
        return None;
    };
    if svn < minimum_svn {
        warn!(feed = %feed, svn, minimum_svn, "fragment svn is below the minimum, skipping fragment");
        decisions.push(FragmentDecision::TooOld {
            feed,
            svn,
            minimum_svn,
        });
        return None;
    }
    info!(feed = %feed, svn, minimum_svn, "accepted fragment");
    remaining.remove(idx);
    decisions.push(FragmentDecision::Accepted { feed, svn });
    Some(text)
}
