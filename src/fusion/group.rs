use super::{fuse, FusionOutput, FusionParams, SourceView};
use crate::error::{Error, Result};
use crate::types::BoundingBox;
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Views fused together share a timepoint and a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct GroupKey {
    pub timepoint: u32,
    pub channel: u32,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tp{}-ch{}", self.timepoint, self.channel)
    }
}

/// Outcome of fusing one group.
#[derive(Debug)]
pub struct GroupResult {
    pub key: GroupKey,
    pub bbox: Option<BoundingBox>,
    pub output: Result<FusionOutput>,
}

/// Split `views` by (timepoint, channel); each group keeps the input order.
pub fn group_views<'a>(views: &[SourceView<'a>]) -> BTreeMap<GroupKey, Vec<SourceView<'a>>> {
    let mut groups: BTreeMap<GroupKey, Vec<SourceView<'a>>> = BTreeMap::new();
    for view in views {
        let key = GroupKey {
            timepoint: view.id.timepoint,
            channel: view.id.channel,
        };
        groups.entry(key).or_default().push(view.clone());
    }
    groups
}

/// Fuse every group on its own.
///
/// Without `bbox` each group uses the box enclosing its own views. A group
/// that fails, e.g. because its buffers cannot be allocated, is reported in
/// its [`GroupResult`] and does not stop the others.
pub fn fuse_groups(
    views: &[SourceView<'_>],
    bbox: Option<&BoundingBox>,
    params: &FusionParams,
) -> Vec<GroupResult> {
    group_views(views)
        .into_iter()
        .map(|(key, members)| {
            let bbox = bbox.copied().or_else(|| {
                BoundingBox::enclosing(members.iter().map(|v| (&v.model, v.dims())))
            });
            let output = match &bbox {
                Some(b) => fuse(b, &members, params),
                None => Err(Error::InvalidParameter(format!("group {key} is empty"))),
            };
            match &output {
                Ok(_) => info!("fused group {key} ({} views)", members.len()),
                Err(e) => warn!("fusion of group {key} failed: {e}"),
            }
            GroupResult { key, bbox, output }
        })
        .collect()
}
