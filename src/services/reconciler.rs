//! 子图对账 - 业务能力层
//!
//! 把三路不完全可靠的信号合并成一张图唯一、去重、标签互不相同的子图列表：
//! - 文字抽取阶段得到的原始子图（标签 / 图注 / 源数据文件）
//! - 目标检测得到的边界框与置信度
//! - 视觉模型为每个检测区域猜测的标签与图注
//!
//! 纯函数，无 I/O，无共享可变状态。
//!
//! ## 规则
//!
//! 1. 按归一化标签（去空白 + 大写）分组；空标签的检测各自单独成组
//! 2. 单元素组直接胜出；多元素组（冲突组）只选一个胜者：
//!    原始子图有边界框时取中心点最近者，否则取置信度最高者，
//!    并列时取检测序号最小者
//! 3. 胜者有原始子图时保留原始图注 / 源数据 / AI 诊断，只刷新边界框和置信度
//! 4. 落败者按 [`ConflictPolicy`] 记录为诊断或提升为新子图
//! 5. 没有被任何检测认领的原始子图原样追加到结果末尾
//!
//! 处理顺序固定：先处理有标签的组（按首次出现顺序），再处理空标签的检测（按输入顺序）。

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::models::{BBox, ConflictRecord, Panel, PanelMatch};
use crate::services::label_allocator::UsedLabels;

/// 冲突组中落败检测的处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// 只记录到 `conflicting_panels`，不生成子图
    #[default]
    RecordOnly,
    /// 以下一个空闲标签生成新子图
    PromoteToNewPanel,
}

/// 对账选项
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
    pub conflict_policy: ConflictPolicy,
}

/// 对账结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// 最终子图列表，整体替换图中原有子图
    pub panels: Vec<Panel>,
    /// 落败检测的诊断记录
    pub conflicts: Vec<ConflictRecord>,
}

/// 使用默认选项对账
pub fn reconcile(original_panels: &[Panel], matches: &[PanelMatch]) -> Reconciliation {
    PanelReconciler::default().reconcile(original_panels, matches)
}

/// 子图对账器
#[derive(Debug, Clone, Default)]
pub struct PanelReconciler {
    options: ReconcileOptions,
}

impl PanelReconciler {
    pub fn new(options: ReconcileOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> ReconcileOptions {
        self.options
    }

    /// 合并原始子图与检测匹配结果
    ///
    /// # 参数
    /// - `original_panels`: 文字抽取阶段得到的子图
    /// - `matches`: 已通过置信度阈值的检测 + 标签猜测
    ///
    /// # 返回
    /// 每个检测序号恰好出现一次：要么在某个子图中，要么在冲突记录中
    pub fn reconcile(&self, original_panels: &[Panel], matches: &[PanelMatch]) -> Reconciliation {
        let originals = OriginalIndex::build(original_panels);
        let groups = group_matches(matches);

        // 所有原始标签和检测给出的标签都预先占用，
        // 顺序分配的标签不会与之后出现的任何标签重复
        let mut reserved = UsedLabels::default();
        for panel in originals.panels() {
            reserved.insert(&panel.label);
        }
        for group in &groups {
            if let GroupKey::Label(label) = &group.key {
                reserved.insert(label);
            }
        }

        let state = groups.iter().fold(ResolveState::new(reserved), |state, group| {
            state.resolve(group, &originals, self.options.conflict_policy)
        });

        let ResolveState {
            mut panels,
            conflicts,
            claimed,
            ..
        } = state;

        let mut unclaimed = 0;
        for panel in originals.panels() {
            if !claimed.contains(&panel.label) {
                panels.push(panel.clone());
                unclaimed += 1;
            }
        }

        info!(
            "对账完成: {} 个检测 -> {} 个子图 ({} 个未被检测到的原始子图), {} 个冲突",
            matches.len(),
            panels.len(),
            unclaimed,
            conflicts.len()
        );

        Reconciliation { panels, conflicts }
    }
}

// ========== 分组 ==========

#[derive(Debug, Clone, PartialEq, Eq)]
enum GroupKey {
    /// 归一化后的非空标签
    Label(String),
    /// 空标签，以检测序号区分，永不与其他检测合并
    Unlabeled(usize),
}

#[derive(Debug)]
struct MatchGroup<'a> {
    key: GroupKey,
    members: Vec<&'a PanelMatch>,
}

/// 有标签的组按首次出现顺序在前，空标签的检测按输入顺序在后
fn group_matches(matches: &[PanelMatch]) -> Vec<MatchGroup<'_>> {
    let mut labeled: Vec<MatchGroup<'_>> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut unlabeled: Vec<MatchGroup<'_>> = Vec::new();

    for m in matches {
        match m.normalized_label() {
            Some(label) => match positions.get(&label) {
                Some(&pos) => labeled[pos].members.push(m),
                None => {
                    positions.insert(label.clone(), labeled.len());
                    labeled.push(MatchGroup {
                        key: GroupKey::Label(label),
                        members: vec![m],
                    });
                }
            },
            None => unlabeled.push(MatchGroup {
                key: GroupKey::Unlabeled(m.detection_index),
                members: vec![m],
            }),
        }
    }

    labeled.extend(unlabeled);
    labeled
}

// ========== 原始子图索引 ==========

/// 检测结果对应的子图来源
#[derive(Debug, Clone, Copy)]
enum Counterpart<'a> {
    /// 文字抽取阶段已有的子图
    Original(&'a Panel),
    /// 仅由视觉检测发现
    Discovered,
}

/// 不区分大小写的原始子图索引
struct OriginalIndex<'a> {
    ordered: Vec<&'a Panel>,
    by_label: HashMap<String, &'a Panel>,
}

impl<'a> OriginalIndex<'a> {
    fn build(panels: &'a [Panel]) -> Self {
        let mut ordered = Vec::with_capacity(panels.len());
        let mut by_label = HashMap::with_capacity(panels.len());

        for panel in panels {
            let key = panel.label.trim().to_uppercase();
            if by_label.contains_key(&key) {
                warn!(
                    "原始子图标签重复 (不区分大小写): '{}'，保留第一个",
                    panel.label
                );
                continue;
            }
            by_label.insert(key, panel);
            ordered.push(panel);
        }

        Self { ordered, by_label }
    }

    fn lookup(&self, normalized_label: &str) -> Counterpart<'a> {
        match self.by_label.get(normalized_label) {
            Some(&panel) => Counterpart::Original(panel),
            None => Counterpart::Discovered,
        }
    }

    fn panels(&self) -> impl Iterator<Item = &'a Panel> + '_ {
        self.ordered.iter().copied()
    }
}

// ========== 逐组求解 ==========

/// 遍历各组时传递的累加状态
struct ResolveState {
    /// 已占用标签（含预留）
    used: UsedLabels,
    /// 被检测认领的原始子图标签
    claimed: UsedLabels,
    panels: Vec<Panel>,
    conflicts: Vec<ConflictRecord>,
}

impl ResolveState {
    fn new(reserved: UsedLabels) -> Self {
        Self {
            used: reserved,
            claimed: UsedLabels::default(),
            panels: Vec::new(),
            conflicts: Vec::new(),
        }
    }

    fn resolve(
        mut self,
        group: &MatchGroup<'_>,
        originals: &OriginalIndex<'_>,
        policy: ConflictPolicy,
    ) -> Self {
        match &group.key {
            GroupKey::Unlabeled(index) => {
                let m = group.members[0];
                let label = self.used.allocate();
                debug!("检测 #{} 无可读标签，分配标签 {}", index, label);
                self.panels.push(Panel::discovered(
                    label,
                    m.caption_guess.clone(),
                    m.detection.bbox,
                    m.detection.confidence,
                ));
            }
            GroupKey::Label(label) => {
                let counterpart = originals.lookup(label);
                let anchor = match counterpart {
                    Counterpart::Original(panel) => panel.bbox,
                    Counterpart::Discovered => None,
                };

                let ranked = rank_candidates(&group.members, anchor.as_ref());
                let Some((winner, losers)) = ranked.split_first() else {
                    return self;
                };

                let panel = emit_winner(winner, counterpart);
                if let Counterpart::Original(original) = counterpart {
                    self.claimed.insert(&original.label);
                }
                if !losers.is_empty() {
                    debug!(
                        "标签 {} 有 {} 个候选，选中检测 #{}",
                        panel.label,
                        ranked.len(),
                        winner.detection_index
                    );
                }

                let final_label = panel.label.clone();
                self.used.insert(&final_label);
                self.panels.push(panel);

                for loser in losers {
                    self.settle_loser(loser, &final_label, policy);
                }
            }
        }
        self
    }

    fn settle_loser(&mut self, loser: &PanelMatch, group_label: &str, policy: ConflictPolicy) {
        match policy {
            ConflictPolicy::RecordOnly => {
                debug!(
                    "检测 #{} 在标签 {} 的冲突中落败 (置信度 {:.2})",
                    loser.detection_index, group_label, loser.detection.confidence
                );
                self.conflicts.push(ConflictRecord {
                    label: group_label.to_string(),
                    detection_index: loser.detection_index,
                    confidence: loser.detection.confidence,
                    bbox: loser.detection.bbox,
                });
            }
            ConflictPolicy::PromoteToNewPanel => {
                let label = self.used.allocate();
                debug!(
                    "检测 #{} 在标签 {} 的冲突中落败，提升为新子图 {}",
                    loser.detection_index, group_label, label
                );
                self.panels.push(Panel::discovered(
                    label,
                    loser.caption_guess.clone(),
                    loser.detection.bbox,
                    loser.detection.confidence,
                ));
            }
        }
    }
}

/// 候选排序：有锚点时按中心距离升序，否则按置信度降序；并列按检测序号
fn rank_candidates<'a>(
    candidates: &[&'a PanelMatch],
    anchor: Option<&BBox>,
) -> Vec<&'a PanelMatch> {
    let score = |m: &PanelMatch| match anchor {
        Some(anchor) => m.detection.bbox.squared_distance_to(anchor),
        None => -m.detection.confidence,
    };

    let mut ranked = candidates.to_vec();
    ranked.sort_by(|a, b| {
        score(*a)
            .total_cmp(&score(*b))
            .then_with(|| a.detection_index.cmp(&b.detection_index))
    });
    ranked
}

fn emit_winner(winner: &PanelMatch, counterpart: Counterpart<'_>) -> Panel {
    match counterpart {
        Counterpart::Original(original) => Panel {
            bbox: Some(winner.detection.bbox),
            confidence: winner.detection.confidence,
            ..original.clone()
        },
        Counterpart::Discovered => Panel::discovered(
            winner.label_guess.trim(),
            winner.caption_guess.clone(),
            winner.detection.bbox,
            winner.detection.confidence,
        ),
    }
}
