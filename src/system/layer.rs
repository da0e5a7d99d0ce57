use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::path::file_name;

/// Which generated outputs the worker may write to the real disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputMode {
    /// Nothing reaches the disk.
    #[default]
    Readonly,
    /// Incremental build metadata (`.tsbuildinfo`) only.
    WriteTsbuildinfo,
    /// Declaration files plus build metadata.
    WriteDts,
    /// Every output of referenced projects.
    WriteReferences,
}

impl OutputMode {
    pub const ALL: [OutputMode; 4] = [
        OutputMode::Readonly,
        OutputMode::WriteTsbuildinfo,
        OutputMode::WriteDts,
        OutputMode::WriteReferences,
    ];

    /// Default mode for a worker: solution builds keep their build metadata on disk.
    pub fn default_for(build: bool) -> Self {
        if build {
            OutputMode::WriteTsbuildinfo
        } else {
            OutputMode::Readonly
        }
    }

    fn row(self) -> usize {
        match self {
            OutputMode::Readonly => 0,
            OutputMode::WriteTsbuildinfo => 1,
            OutputMode::WriteDts => 2,
            OutputMode::WriteReferences => 3,
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputMode::Readonly => "readonly",
            OutputMode::WriteTsbuildinfo => "write-tsbuildinfo",
            OutputMode::WriteDts => "write-dts",
            OutputMode::WriteReferences => "write-references",
        })
    }
}

/// Classification of a path for routing purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// Anything that is not a build artifact.
    Source,
    /// `.tsbuildinfo`
    BuildInfo,
    /// `.d.ts` family and declaration maps.
    Declaration,
    /// Any other generated output (`.js`, source maps).
    Output,
}

impl PathKind {
    pub const ALL: [PathKind; 4] = [
        PathKind::Source,
        PathKind::BuildInfo,
        PathKind::Declaration,
        PathKind::Output,
    ];

    pub fn classify(path: &Path, is_artifact: bool) -> Self {
        if !is_artifact {
            return PathKind::Source;
        }
        let name = file_name(path);
        if name.ends_with(".tsbuildinfo") {
            PathKind::BuildInfo
        } else if [".d.ts", ".d.mts", ".d.cts", ".d.ts.map"]
            .iter()
            .any(|ext| name.ends_with(ext))
        {
            PathKind::Declaration
        } else {
            PathKind::Output
        }
    }

    fn column(self) -> usize {
        match self {
            PathKind::Source => 0,
            PathKind::BuildInfo => 1,
            PathKind::Declaration => 2,
            PathKind::Output => 3,
        }
    }
}

/// Backing store serving a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    /// Reads and writes hit the disk.
    Real,
    /// Reads and writes stay in the in-memory overlay, seeded from disk on first access.
    Memory,
    /// Reads hit the disk, writes are dropped.
    Passive,
}

use Layer::{Memory, Passive, Real};

/// Rows: output mode. Columns: source, build-info, declaration, output.
///
/// The same store serves reads and writes of a path, so the compiler always
/// reads back what it wrote during the session.
const LAYERS: [[Layer; 4]; 4] = [
    [Passive, Memory, Memory, Memory],
    [Passive, Real, Memory, Memory],
    [Passive, Real, Real, Memory],
    [Passive, Real, Real, Real],
];

pub fn layer_for(mode: OutputMode, kind: PathKind) -> Layer {
    LAYERS[mode.row()][kind.column()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sources_always_pass_through() {
        for mode in OutputMode::ALL {
            assert_eq!(layer_for(mode, PathKind::Source), Layer::Passive, "{mode}");
        }
    }

    #[test]
    fn test_layer_matrix_is_monotonic_in_mode() {
        // Once a mode writes a kind to disk, every more permissive mode does too.
        for kind in PathKind::ALL {
            let mut seen_real = false;
            for mode in OutputMode::ALL {
                let layer = layer_for(mode, kind);
                if seen_real {
                    assert_eq!(layer, Layer::Real, "{mode} {kind:?}");
                }
                seen_real |= layer == Layer::Real;
            }
        }
    }

    #[test]
    fn test_layer_matrix_exact_values() {
        let expected = [
            (OutputMode::Readonly, [Passive, Memory, Memory, Memory]),
            (OutputMode::WriteTsbuildinfo, [Passive, Real, Memory, Memory]),
            (OutputMode::WriteDts, [Passive, Real, Real, Memory]),
            (OutputMode::WriteReferences, [Passive, Real, Real, Real]),
        ];
        for (mode, layers) in expected {
            for (kind, layer) in PathKind::ALL.into_iter().zip(layers) {
                assert_eq!(layer_for(mode, kind), layer, "{mode} {kind:?}");
            }
        }
    }

    #[test]
    fn test_classify_by_name_only_for_artifacts() {
        let p = Path::new("/p/dist/index.d.ts");
        assert_eq!(PathKind::classify(p, false), PathKind::Source);
        assert_eq!(PathKind::classify(p, true), PathKind::Declaration);
        assert_eq!(
            PathKind::classify(Path::new("/p/tsconfig.tsbuildinfo"), true),
            PathKind::BuildInfo
        );
        assert_eq!(
            PathKind::classify(Path::new("/p/dist/index.js"), true),
            PathKind::Output
        );
    }

    #[test]
    fn test_output_mode_wire_names() {
        let mode: OutputMode = serde_json::from_str("\"write-tsbuildinfo\"").unwrap();
        assert_eq!(mode, OutputMode::WriteTsbuildinfo);
        assert_eq!(
            serde_json::to_string(&OutputMode::WriteReferences).unwrap(),
            "\"write-references\""
        );
    }
}
