// Copyright (C) the gdb-front contributors. All rights reserved.
//
// This file is part of gdb-front, distributed under the GPL 2.0 with a
// linking exception. For the full terms, see the included COPYING file.

use enumflags2::{bitflags, BitFlags};

use crate::record::Record;

/// Debugger capabilities reported by `-list-features`.
#[bitflags]
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Feature {
    FrozenVarobjs,
    PendingBreakpoints,
    PythonScripting,
    ThreadInfo,
    DataReadMemoryBytes,
    /// Breakpoint changes arrive as async records.
    BreakpointNotifications,
    AdaTaskInfo,
    LanguageOption,
    GdbMiCommand,
    UndefinedCommandErrorCode,
    ExecRunStart,
    /// `-data-disassemble -a function` is accepted.
    DataDisassembleA,
}

/// Target capabilities reported by `-list-target-features`. The list can
/// change whenever the target does (`-target-select`, `-exec-run`, …).
#[bitflags]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetFeature {
    /// The debugger accepts further commands while the target runs.
    AsyncExecution,
    ReverseExecution,
}

impl Feature {
    fn from_name(name: &[u8]) -> Option<Self> {
        Some(match name {
            b"frozen-varobjs" => Feature::FrozenVarobjs,
            b"pending-breakpoints" => Feature::PendingBreakpoints,
            b"python" => Feature::PythonScripting,
            b"thread-info" => Feature::ThreadInfo,
            b"data-read-memory-bytes" => Feature::DataReadMemoryBytes,
            b"breakpoint-notifications" => Feature::BreakpointNotifications,
            b"ada-task-info" => Feature::AdaTaskInfo,
            b"language-option" => Feature::LanguageOption,
            b"info-gdb-mi-command" => Feature::GdbMiCommand,
            b"undefined-command-error-code" => Feature::UndefinedCommandErrorCode,
            b"exec-run-start-option" => Feature::ExecRunStart,
            b"data-disassemble-a-option" => Feature::DataDisassembleA,
            _ => return None,
        })
    }
}

impl TargetFeature {
    fn from_name(name: &[u8]) -> Option<Self> {
        Some(match name {
            b"async" => TargetFeature::AsyncExecution,
            b"reverse" => TargetFeature::ReverseExecution,
            _ => return None,
        })
    }
}

/// Collects the `features` array of a `-list-features` reply into a bitset.
/// Unknown capability strings are ignored.
pub fn parse_features(rec: &Record) -> BitFlags<Feature> {
    let mut set = BitFlags::empty();
    if let Some(list) = rec.extract_atom("features") {
        for child in rec.children(list) {
            if let Some(feature) = Feature::from_name(child.value.slice(&rec.buf)) {
                set |= feature;
            }
        }
    }
    set
}

pub fn parse_target_features(rec: &Record) -> BitFlags<TargetFeature> {
    let mut set = BitFlags::empty();
    if let Some(list) = rec.extract_atom("features") {
        for child in rec.children(list) {
            if let Some(feature) = TargetFeature::from_name(child.value.slice(&rec.buf)) {
                set |= feature;
            }
        }
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_record;

    #[test]
    fn features_parse_into_bitset() {
        let rec = parse_record(
            b"^done,features=[\"frozen-varobjs\",\"pending-breakpoints\",\"python\",\"mystery\"]",
        )
        .unwrap();
        let set = parse_features(&rec);
        assert!(set.contains(Feature::FrozenVarobjs));
        assert!(set.contains(Feature::PendingBreakpoints));
        assert!(set.contains(Feature::PythonScripting));
        assert!(!set.contains(Feature::ThreadInfo));
    }

    #[test]
    fn empty_feature_list() {
        let rec = parse_record(b"^done,features=[]").unwrap();
        assert!(parse_features(&rec).is_empty());
    }

    #[test]
    fn target_features_parse() {
        let rec = parse_record(b"^done,features=[\"async\",\"reverse\"]").unwrap();
        let set = parse_target_features(&rec);
        assert!(set.contains(TargetFeature::AsyncExecution));
        assert!(set.contains(TargetFeature::ReverseExecution));
    }
}
