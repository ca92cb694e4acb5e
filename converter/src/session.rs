// session.rs — Build pass driver and lattice splitting
//
// Walks the planned records in order, converts each through `BuildEnv` and
// forwards the element to every output machine. A beam redefinition on an
// already defined beam ends the current section when splitting is enabled:
// every machine is given the beam and a sampler, handed to the caller to be
// written, then reset together with the machine state, beam and names.
//
// Preconditions: `plan` is the reconciled (and optionally combined) registry.
// Postconditions: the caller has received exactly one flushed section per
//   split plus the final one, for every machine.
// Failure modes: errors returned by the caller's section callback.
// Side effects: none beyond the callback.

use std::fmt;

use serde::Serialize;

use crate::builders::BuildEnv;
use crate::diag::{codes, Diagnostic};
use crate::error::ConvertError;
use crate::machine::{dispatch, MachineBuilder};
use crate::record::{ElementKind, ElementRecord};
use crate::state::BeamState;

// ── Sections ───────────────────────────────────────────────────────────────

/// Which output file a section is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionLabel {
    /// No split occurred: `<stem>`.
    Whole,
    /// `<stem>_part<N>`.
    Part(u32),
}

impl SectionLabel {
    pub fn file_stem(self, stem: &str) -> String {
        match self {
            SectionLabel::Whole => stem.to_owned(),
            SectionLabel::Part(n) => format!("{}_part{}", stem, n),
        }
    }
}

impl fmt::Display for SectionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SectionLabel::Whole => write!(f, "whole lattice"),
            SectionLabel::Part(n) => write!(f, "part {}", n),
        }
    }
}

/// A finished section of one machine, ready to render.
pub struct FlushedSection<'a> {
    pub label: SectionLabel,
    pub machine: &'a dyn MachineBuilder,
}

// ── Splitter ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Splitter {
    enabled: bool,
    flushed: u32,
}

impl Splitter {
    pub fn new(enabled: bool) -> Self {
        Self { enabled, flushed: 0 }
    }

    /// Does `record` end the current section? Only a redefinition the
    /// builder will accept does; a refused one leaves the section open.
    pub fn triggers(&self, record: &ElementRecord, beam: &BeamState) -> bool {
        self.enabled
            && beam.defined
            && matches!(&record.kind, ElementKind::Beam(def) if def.defines_beam())
    }

    /// Label of the section being closed by a split.
    pub fn next_part(&mut self) -> SectionLabel {
        self.flushed += 1;
        SectionLabel::Part(self.flushed)
    }

    /// Label of the last section.
    pub fn final_label(&self) -> SectionLabel {
        if self.flushed == 0 {
            SectionLabel::Whole
        } else {
            SectionLabel::Part(self.flushed + 1)
        }
    }
}

// ── Build driver ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildReport {
    pub sections: Vec<SectionLabel>,
    /// Elements produced by the builders (before capability drops).
    pub elements: usize,
    /// Metres.
    pub total_length: f64,
}

pub type SectionSink<'s> = dyn FnMut(FlushedSection<'_>) -> Result<(), ConvertError> + 's;

pub fn build_sections(
    plan: &[ElementRecord],
    env: &mut BuildEnv,
    splitter: &mut Splitter,
    machines: &mut [&mut dyn MachineBuilder],
    on_section: &mut SectionSink<'_>,
) -> Result<BuildReport, ConvertError> {
    let mut report = BuildReport::default();
    env.index_lenders(plan);

    for record in plan {
        if splitter.triggers(record, &env.beam) {
            let label = splitter.next_part();
            env.diagnostics.push(
                Diagnostic::info(
                    codes::I0313,
                    format!("beam redefined, lattice split; preceding section written as {}", label),
                )
                .at_line(record.line),
            );
            tracing::info!(line = record.line, %label, "lattice split");
            flush(label, env, machines, on_section)?;
            report.sections.push(label);
            env.reset_section();
            for machine in machines.iter_mut() {
                machine.reset();
            }
        }

        let Some(element) = env.build(record) else {
            continue;
        };
        report.elements += 1;
        report.total_length += element.length();
        for machine in machines.iter_mut() {
            if let Err(refused) = dispatch(&mut **machine, &element) {
                env.diagnostics.push(
                    Diagnostic::warning(codes::W0306, format!("{}, {} dropped", refused, element.name()))
                        .at_line(record.line),
                );
            }
        }
    }

    let label = splitter.final_label();
    flush(label, env, machines, on_section)?;
    report.sections.push(label);
    Ok(report)
}

fn flush(
    label: SectionLabel,
    env: &BuildEnv,
    machines: &mut [&mut dyn MachineBuilder],
    on_section: &mut SectionSink<'_>,
) -> Result<(), ConvertError> {
    for machine in machines.iter_mut() {
        if env.beam.defined {
            machine.set_beam(&env.beam);
        }
        machine.add_sampler("all");
    }
    for machine in machines.iter() {
        on_section(FlushedSection {
            label,
            machine: &**machine,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmad::GmadMachine;
    use crate::machine::{Ecosystem, Element};
    use crate::madx::MadxMachine;
    use crate::pipeline::ConvertOptions;
    use crate::populate::populate;
    use crate::tokenizer::tokenize;

    struct Flushed {
        label: SectionLabel,
        ecosystem: Ecosystem,
        elements: Vec<Element>,
        has_beam_line: bool,
    }

    fn run(source: &str, split: bool) -> (Vec<Flushed>, BuildEnv, BuildReport) {
        let options = ConvertOptions {
            split,
            ..ConvertOptions::default()
        };
        let plan = populate(&tokenize(source), split).unwrap().registry.records().to_vec();
        let mut env = BuildEnv::new(&options);
        let mut splitter = Splitter::new(split);
        let mut gmad = GmadMachine::new();
        let mut madx = MadxMachine::new();
        let mut flushed = Vec::new();
        let mut sink = |section: FlushedSection<'_>| -> Result<(), ConvertError> {
            let text = section.machine.render(&crate::pipeline::Provenance::compute(source, "t.txt"));
            flushed.push(Flushed {
                label: section.label,
                ecosystem: section.machine.ecosystem(),
                elements: section.machine.elements().to_vec(),
                has_beam_line: text.contains("beam, ") || text.contains("BEAM, "),
            });
            Ok(())
        };
        let report = {
            let mut machines: [&mut dyn MachineBuilder; 2] = [&mut gmad, &mut madx];
            build_sections(&plan, &mut env, &mut splitter, &mut machines, &mut sink).unwrap()
        };
        (flushed, env, report)
    }

    const TWO_BEAMS: &str = "\
1. 0.1 1. 0.1 1. 0. 0. 1. ;
16. 7. 0.7 ;
2. 5. ;
4. 1. 5. ;
1. 0.1 1. 0.1 1. 0. 0. 2. ;
2. 5. ;
4. 1. 5. ;
";

    #[test]
    fn single_beam_writes_whole_lattice() {
        let (flushed, _, report) = run("1. 0.1 1. 0.1 1. 0. 0. 1. ;\n3. 1.0 ;\n", true);
        assert_eq!(report.sections, vec![SectionLabel::Whole]);
        assert_eq!(flushed.len(), 2);
        assert!(flushed.iter().all(|f| f.label == SectionLabel::Whole && f.has_beam_line));
    }

    #[test]
    fn beam_redefinition_splits_and_resets_state() {
        let (flushed, _, report) = run(TWO_BEAMS, true);
        assert_eq!(report.sections, vec![SectionLabel::Part(1), SectionLabel::Part(2)]);
        assert_eq!(flushed.len(), 4);

        let dipole_fint = |f: &Flushed| match &f.elements[0] {
            Element::Dipole(spec) => spec.fint,
            _ => panic!("expected dipole"),
        };
        let first = flushed.iter().find(|f| f.label == SectionLabel::Part(1)).unwrap();
        let second = flushed.iter().find(|f| f.label == SectionLabel::Part(2)).unwrap();
        assert_eq!(dipole_fint(first), Some(0.7));
        assert_eq!(dipole_fint(second), Some(0.0));
        assert_eq!(first.elements[0].name(), "BM1");
        assert_eq!(second.elements[0].name(), "BM1");
    }

    #[test]
    fn dont_split_keeps_one_section_and_updates_beam() {
        let (flushed, env, report) = run(TWO_BEAMS, false);
        assert_eq!(report.sections, vec![SectionLabel::Whole]);
        assert_eq!(flushed.len(), 2);
        assert_eq!(flushed[0].elements.len(), 2);
        assert_eq!(env.beam.momentum, 2.0);
    }

    #[test]
    fn madx_drops_collimators_with_a_warning() {
        let (flushed, env, _) = run("6. 1. 1. ;\n3. 0.5 ;\n", true);
        let gmad = flushed.iter().find(|f| f.ecosystem == Ecosystem::Bdsim).unwrap();
        let madx = flushed.iter().find(|f| f.ecosystem == Ecosystem::Madx).unwrap();
        assert_eq!(gmad.elements.len(), 1);
        assert!(madx.elements.is_empty());
        assert_eq!(env.diagnostics.iter().filter(|d| d.is(codes::W0306)).count(), 1);
    }

    #[test]
    fn no_beam_line_without_a_beam() {
        let (flushed, _, report) = run("3. 1.0 ;\n", true);
        assert!(flushed.iter().all(|f| !f.has_beam_line));
        assert_eq!(report.total_length, 1.0);
    }

    fn dipole_angles(flushed: &[Flushed]) -> Vec<f64> {
        flushed
            .iter()
            .filter(|f| f.ecosystem == Ecosystem::Bdsim)
            .flat_map(|f| f.elements.iter())
            .filter_map(|e| match e {
                Element::Dipole(spec) => Some(spec.angle),
                _ => None,
            })
            .collect()
    }

    const ANGLE_MODE_THEN_BEAM: &str = "\
1. 0.1 1. 0.1 1. 0. 0. 1. ;
13. 48. ;
4. 1. 10. ;
1. 0.1 1. 0.1 1. 0. 0. 1. ;
4. 1. 10. ;
";

    #[test]
    fn split_puts_bend_definition_back_to_field_mode() {
        let (flushed, _, report) = run(ANGLE_MODE_THEN_BEAM, true);
        assert_eq!(report.sections.len(), 2);
        let angles = dipole_angles(&flushed);
        assert_eq!(angles.len(), 2);
        // 10 degrees, then 1 m in 1 T at 1 GeV/c.
        assert_eq!(angles[0], 0.1745);
        assert_eq!(angles[1], 0.2998);
    }

    #[test]
    fn dont_split_keeps_angle_mode() {
        let (flushed, _, _) = run(ANGLE_MODE_THEN_BEAM, false);
        assert_eq!(dipole_angles(&flushed), vec![0.1745, 0.1745]);
    }

    const TWO_CORRECTIONS: &str = "\
1. 0.1 1. 0.1 1. 0. 0. 1. ;
12. 0.5 0. 0. 0. 0. 0. 0. 0. 0. 0. 0. 0. 0. 0. 0. ;
3. 1. ;
1. 0.1 1. 0.1 1. 0. 0. 2. ;
12. 0.3 0. 0. 0. 0. 0. 0. 0. 0. 0. 0. 0. 0. 0. 0. ;
";

    #[test]
    fn dont_split_honours_only_the_first_correction() {
        let (_, env, _) = run(TWO_CORRECTIONS, false);
        assert!(env.beam.corrected);
        assert_eq!(env.diagnostics.iter().filter(|d| d.is(codes::I0304)).count(), 1);
        let expected = -0.5 / 0.75f64.sqrt();
        assert!((env.beam.twiss.alpha_x - expected).abs() < 1e-12);
        assert_eq!(env.beam.momentum, 2.0);
    }

    #[test]
    fn split_allows_one_correction_per_section() {
        let (_, env, report) = run(TWO_CORRECTIONS, true);
        assert_eq!(report.sections.len(), 2);
        assert!(env.diagnostics.iter().all(|d| !d.is(codes::I0304)));
        let expected = -0.3 / 0.91f64.sqrt();
        assert!((env.beam.twiss.alpha_x - expected).abs() < 1e-12);
    }

    #[test]
    fn refused_redefinition_does_not_split() {
        let source = "1. 0.1 1. 0.1 1. 0. 0. 1. ;\n3. 1. ;\n1. 0.1 1. 0.1 1. 0. 0. 0. ;\n3. 2. ;\n";
        let (flushed, env, report) = run(source, true);
        assert_eq!(report.sections, vec![SectionLabel::Whole]);
        assert!(env.diagnostics.iter().any(|d| d.is(codes::W0310)));
        assert!(flushed.iter().all(|f| f.has_beam_line && f.elements.len() == 2));
        assert_eq!(env.beam.momentum, 1.0);
    }

    #[test]
    fn section_file_stems() {
        assert_eq!(SectionLabel::Whole.file_stem("line"), "line");
        assert_eq!(SectionLabel::Part(3).file_stem("line"), "line_part3");
    }
}
