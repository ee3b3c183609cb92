//! Version gating and patch delivery.
//!
//! Patches form a directed graph per (locale, platform, os) whose
//! edges are on-disk patch files. A client on an unsupported build is
//! either upgradable (a path exists from its build to a supported
//! build, possibly entered through a rollup patch) or rejected.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use ebonhold_game::types::GameVersion;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::conf::SurveyConfig;

/// On-disk metadata for a served file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub md5: [u8; 16],
}

/// One patch table row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchMeta {
    pub build_from: u16,
    pub build_to: u16,
    pub locale: String,
    pub arch: String,
    pub os: String,
    pub rollup: bool,
    pub mpq: bool,
    pub file: FileMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchLevel {
    Ok,
    TooOld,
    TooNew,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    locale: String,
    platform: String,
    os: String,
}

/// The survey payload, preloaded into memory (it is small and served
/// to many clients).
#[derive(Debug, Clone)]
pub struct Survey {
    pub id: u32,
    pub meta: FileMeta,
    pub data: Vec<u8>,
    /// (platform, os) codes the survey client runs on.
    pub platforms: Vec<(String, String)>,
}

/// A directed graph of builds; an edge exists for every patch file.
#[derive(Debug, Clone, Default)]
pub struct PatchGraph {
    edges: HashMap<u16, Vec<u16>>,
}

impl PatchGraph {
    pub fn new(patches: &[PatchMeta]) -> Self {
        let mut edges: HashMap<u16, Vec<u16>> = HashMap::new();

        for patch in patches {
            edges.entry(patch.build_from).or_default().push(patch.build_to);
        }

        Self { edges }
    }

    /// Whether `to` is reachable from `from`.
    pub fn is_path(&self, from: u16, to: u16) -> bool {
        self.path(from, to).is_some()
    }

    /// Shortest hop sequence from `from` to `to` as (from, to) pairs.
    pub fn path(&self, from: u16, to: u16) -> Option<Vec<(u16, u16)>> {
        if from == to {
            return Some(Vec::new());
        }

        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        let mut parents: HashMap<u16, u16> = HashMap::new();

        visited.insert(from);
        queue.push_back(from);

        while let Some(build) = queue.pop_front() {
            let Some(nexts) = self.edges.get(&build) else {
                continue;
            };

            for &next in nexts {
                if !visited.insert(next) {
                    continue;
                }

                parents.insert(next, build);

                if next == to {
                    let mut hops = Vec::new();
                    let mut current = to;
                    while current != from {
                        let parent = parents[&current];
                        hops.push((parent, current));
                        current = parent;
                    }
                    hops.reverse();
                    return Some(hops);
                }

                queue.push_back(next);
            }
        }

        None
    }
}

/// The version gate and patch locator.
#[derive(Debug, Default)]
pub struct Patcher {
    versions: Vec<GameVersion>,
    bins: HashMap<Key, Vec<PatchMeta>>,
    graphs: HashMap<Key, PatchGraph>,
    survey: Option<Survey>,
}

impl Patcher {
    pub fn new(
        versions: Vec<GameVersion>,
        patches: Vec<PatchMeta>,
        survey: Option<Survey>,
    ) -> Self {
        let mut bins: HashMap<Key, Vec<PatchMeta>> = HashMap::new();

        for patch in patches {
            let key = Key {
                locale: patch.locale.clone(),
                platform: patch.arch.clone(),
                os: patch.os.clone(),
            };
            bins.entry(key).or_default().push(patch);
        }

        let graphs = bins
            .iter()
            .map(|(key, metas)| (key.clone(), PatchGraph::new(metas)))
            .collect();

        Self {
            versions,
            bins,
            graphs,
            survey,
        }
    }

    pub fn patch_count(&self) -> usize {
        self.bins.values().map(Vec::len).sum()
    }

    /// Exact allow-list match, otherwise too old (patchable) or too
    /// new (rejected).
    pub fn check_version(&self, client: &GameVersion) -> PatchLevel {
        if self.versions.contains(client) {
            return PatchLevel::Ok;
        }

        if self.versions.iter().any(|v| v > client) {
            return PatchLevel::TooOld;
        }

        PatchLevel::TooNew
    }

    /// The concrete next patch on the path from the client's build to
    /// a supported build, if one exists.
    pub fn find_patch(
        &self,
        client: &GameVersion,
        locale: &str,
        platform: &str,
        os: &str,
    ) -> Option<PatchMeta> {
        let key = Key {
            locale: locale.to_string(),
            platform: platform.to_string(),
            os: os.to_string(),
        };

        let graph = self.graphs.get(&key)?;
        let patches = self.bins.get(&key)?;

        let mut build = client.build;
        let mut reachable = self
            .versions
            .iter()
            .any(|v| graph.is_path(build, v.build));

        // no direct path; try to enter the graph through a rollup
        if !reachable {
            for version in &self.versions {
                if let Some(meta) = locate_rollup(patches, client.build, version.build) {
                    if graph.is_path(meta.build_from, version.build) {
                        build = meta.build_from;
                        reachable = true;
                        break;
                    }
                }
            }
        }

        if !reachable {
            return None;
        }

        for version in &self.versions {
            let Some(hops) = graph.path(build, version.build) else {
                continue;
            };

            let Some(&(hop_from, hop_to)) = hops.first() else {
                continue;
            };

            if let Some(patch) = patches
                .iter()
                .find(|p| p.build_from == hop_from && p.build_to == hop_to)
            {
                return Some(patch.clone());
            }
        }

        None
    }

    pub fn survey_id(&self) -> u32 {
        self.survey.as_ref().map(|s| s.id).unwrap_or(0)
    }

    pub fn survey_meta(&self) -> Option<&FileMeta> {
        self.survey.as_ref().map(|s| &s.meta)
    }

    pub fn survey_data(&self) -> Option<&[u8]> {
        self.survey.as_ref().map(|s| s.data.as_slice())
    }

    /// Whether the survey client runs on the given platform.
    pub fn survey_platform(&self, platform: &str, os: &str) -> bool {
        self.survey
            .as_ref()
            .map(|s| {
                s.platforms
                    .iter()
                    .any(|(p, o)| p == platform && o == os)
            })
            .unwrap_or(false)
    }
}

/// The smallest rollup patch that covers the client: its source build
/// at or below the client's, its target at or below the server's.
fn locate_rollup<'a>(
    patches: &'a [PatchMeta],
    from: u16,
    to: u16,
) -> Option<&'a PatchMeta> {
    let mut best: Option<&PatchMeta> = None;

    for patch in patches.iter().filter(|p| p.rollup) {
        if patch.build_from <= from && patch.build_to <= to {
            best = match best {
                Some(current) if current.file.size < patch.file.size => Some(current),
                _ => Some(patch),
            };
        }
    }

    best
}

/// Scan a patch directory for `<locale>_<from>_<to>_<arch>_<os>.mpq`
/// style names and fill size and MD5 from the file contents. The
/// metadata is computed lazily here rather than persisted elsewhere.
pub fn load_patch_files(path: &Path) -> Result<Vec<PatchMeta>> {
    let mut patches = Vec::new();

    let entries = std::fs::read_dir(path)
        .with_context(|| format!("could not open patch dir {}", path.display()))?;

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();

        let Some(mut meta) = parse_patch_name(&name) else {
            debug!("skipping unrecognized patch file {}", name);
            continue;
        };

        meta.file = load_file_meta(&entry.path())
            .with_context(|| format!("could not load patch {}", name))?;
        patches.push(meta);
    }

    Ok(patches)
}

/// Load the survey MPQ into memory.
pub fn load_survey(config: &SurveyConfig) -> Result<Survey> {
    let meta = load_file_meta(&config.path)?;
    let data = std::fs::read(&config.path)
        .with_context(|| format!("could not read survey {}", config.path.display()))?;

    Ok(Survey {
        id: config.id,
        meta,
        data,
        platforms: config.platforms.clone(),
    })
}

fn load_file_meta(path: &Path) -> Result<FileMeta> {
    let bytes =
        std::fs::read(path).with_context(|| format!("could not read {}", path.display()))?;

    let digest = Md5::digest(&bytes);

    Ok(FileMeta {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        path: path.to_path_buf(),
        size: bytes.len() as u64,
        md5: digest.as_slice().try_into().expect("md5 digests are 16 bytes"),
    })
}

/// `enUS_5875_6005_x86_win.mpq`; a leading `r` on the target build
/// marks a rollup.
fn parse_patch_name(name: &str) -> Option<PatchMeta> {
    let stem = name.strip_suffix(".mpq")?;
    let parts: Vec<&str> = stem.split('_').collect();

    if parts.len() != 5 {
        return None;
    }

    let build_from = parts[1].parse().ok()?;
    let (rollup, to) = match parts[2].strip_prefix('r') {
        Some(to) => (true, to),
        None => (false, parts[2]),
    };

    Some(PatchMeta {
        build_from,
        build_to: to.parse().ok()?,
        locale: parts[0].to_string(),
        arch: parts[3].to_string(),
        os: parts[4].to_string(),
        rollup,
        mpq: true,
        file: FileMeta {
            name: name.to_string(),
            path: PathBuf::new(),
            size: 0,
            md5: [0; 16],
        },
    })
}

#[cfg(test)]
mod test {
    use ebonhold_game::types::GameVersion;

    use super::{parse_patch_name, FileMeta, PatchGraph, PatchLevel, PatchMeta, Patcher};

    fn version(build: u16) -> GameVersion {
        GameVersion {
            major: 1,
            minor: 12,
            patch: 1,
            build,
        }
    }

    fn patch(from: u16, to: u16, rollup: bool) -> PatchMeta {
        PatchMeta {
            build_from: from,
            build_to: to,
            locale: "enUS".to_string(),
            arch: "x86".to_string(),
            os: "Win".to_string(),
            rollup,
            mpq: false,
            file: FileMeta {
                name: format!("enUS_{}_{}_x86_Win.mpq", from, to),
                path: Default::default(),
                size: (to - from) as u64,
                md5: [0; 16],
            },
        }
    }

    #[test]
    pub fn graph_reachability() {
        let patches = vec![patch(5302, 5875, false), patch(5875, 6005, false)];
        let graph = PatchGraph::new(&patches);

        assert!(graph.is_path(5302, 6005));
        assert!(graph.is_path(5875, 6005));
        assert!(!graph.is_path(6005, 5875));
        assert!(!graph.is_path(4999, 6005));
    }

    #[test]
    pub fn graph_next_hop() {
        let patches = vec![patch(5302, 5875, false), patch(5875, 6005, false)];
        let graph = PatchGraph::new(&patches);

        let hops = graph.path(5302, 6005).unwrap();
        assert_eq!(hops, vec![(5302, 5875), (5875, 6005)]);
    }

    #[test]
    pub fn version_gating() {
        let patcher = Patcher::new(vec![version(6005)], Vec::new(), None);

        assert_eq!(patcher.check_version(&version(6005)), PatchLevel::Ok);
        assert_eq!(patcher.check_version(&version(5875)), PatchLevel::TooOld);
        assert_eq!(
            patcher.check_version(&GameVersion {
                major: 2,
                minor: 0,
                patch: 0,
                build: 6180
            }),
            PatchLevel::TooNew
        );
    }

    /// 5875 -> {6005} with a direct patch on file.
    #[test]
    pub fn next_patch_located() {
        let patcher = Patcher::new(
            vec![version(6005)],
            vec![patch(5875, 6005, false)],
            None,
        );

        let meta = patcher
            .find_patch(&version(5875), "enUS", "x86", "Win")
            .unwrap();
        assert_eq!(meta.build_from, 5875);
        assert_eq!(meta.build_to, 6005);

        // wrong platform bin has no graph
        assert!(patcher
            .find_patch(&version(5875), "enUS", "PPC", "OSX")
            .is_none());
    }

    #[test]
    pub fn chained_patch_returns_first_hop() {
        let patcher = Patcher::new(
            vec![version(6005)],
            vec![patch(5302, 5875, false), patch(5875, 6005, false)],
            None,
        );

        let meta = patcher
            .find_patch(&version(5302), "enUS", "x86", "Win")
            .unwrap();
        assert_eq!((meta.build_from, meta.build_to), (5302, 5875));
    }

    #[test]
    pub fn rollup_enters_the_graph() {
        // no path from 4500, but a rollup 4449->5875 covers it
        let patcher = Patcher::new(
            vec![version(6005)],
            vec![patch(5875, 6005, false), patch(4449, 5875, true)],
            None,
        );

        let meta = patcher
            .find_patch(&version(4500), "enUS", "x86", "Win")
            .unwrap();
        assert_eq!((meta.build_from, meta.build_to), (4449, 5875));
        assert!(meta.rollup);
    }

    #[test]
    pub fn unpatchable_build_yields_none() {
        let patcher = Patcher::new(vec![version(6005)], vec![patch(5875, 6005, false)], None);
        assert!(patcher
            .find_patch(&version(5000), "enUS", "x86", "Win")
            .is_none());
    }

    #[test]
    pub fn patch_names_parse() {
        let meta = parse_patch_name("enUS_5875_6005_x86_Win.mpq").unwrap();
        assert_eq!((meta.build_from, meta.build_to), (5875, 6005));
        assert!(!meta.rollup);

        let meta = parse_patch_name("enUS_4449_r5875_x86_Win.mpq").unwrap();
        assert!(meta.rollup);
        assert_eq!(meta.build_to, 5875);

        assert!(parse_patch_name("readme.txt").is_none());
    }
}
