// Snapshot tests for rendered BDSIM and MAD-X output.
//
// Converts `tests/lattices/beamline.txt` (one of every converted kind) and
// snapshots both renderings. The provenance is pinned so the header does not
// change with the crate version or the fixture bytes.
//
// Update snapshots with: cargo insta review

use std::path::Path;

use tconv::error::ConvertError;
use tconv::gmad::GmadMachine;
use tconv::machine::{Ecosystem, MachineBuilder};
use tconv::madx::MadxMachine;
use tconv::pipeline::{convert, ConvertOptions, Provenance};
use tconv::session::FlushedSection;

fn pinned_provenance(name: &str) -> Provenance {
    Provenance {
        source_name: name.to_owned(),
        source_hash: [0; 32],
        converter_version: "0.0.0",
    }
}

/// Render every flushed section of `name`, keyed by ecosystem.
fn render_fixture(name: &str) -> Vec<(Ecosystem, String)> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("lattices")
        .join(name);
    let source = std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("cannot read {}: {}", path.display(), e));
    let provenance = pinned_provenance(name);

    let mut gmad = GmadMachine::new();
    let mut madx = MadxMachine::new();
    let mut rendered = Vec::new();
    let mut sink = |section: FlushedSection<'_>| -> Result<(), ConvertError> {
        rendered.push((section.machine.ecosystem(), section.machine.render(&provenance)));
        Ok(())
    };
    {
        let mut machines: [&mut dyn MachineBuilder; 2] = [&mut gmad, &mut madx];
        convert(&source, name, ConvertOptions::default(), &mut machines, &mut sink)
            .unwrap_or_else(|e| panic!("conversion of {} failed: {}", name, e));
    }
    rendered
}

fn rendered_for(rendered: &[(Ecosystem, String)], ecosystem: Ecosystem) -> String {
    rendered
        .iter()
        .find(|(e, _)| *e == ecosystem)
        .map(|(_, text)| text.clone())
        .unwrap_or_else(|| panic!("no {} output", ecosystem))
}

#[test]
fn snapshot_beamline_gmad() {
    let rendered = render_fixture("beamline.txt");
    let text = rendered_for(&rendered, Ecosystem::Bdsim);
    insta::assert_snapshot!("beamline_gmad", text);
}

#[test]
fn snapshot_beamline_madx() {
    let rendered = render_fixture("beamline.txt");
    let text = rendered_for(&rendered, Ecosystem::Madx);
    insta::assert_snapshot!("beamline_madx", text);
}
