//! Backbone-only PDB reading and writing.
//!
//! Each residue is written as ideal N, CA and C atoms placed by its frame, as glycine. Reading
//! rebuilds frames from the N, CA and C atoms of every residue that has all three.

use anyhow::{Context, anyhow, bail};
use nalgebra::Point3;
use rigidiff::core::models::chain::ChainInfo;
use rigidiff::core::models::frame::RigidFrame;
use rigidiff::core::models::reference::ReferenceStructure;
use rigidiff::core::models::structure::Structure;
use std::fmt::Write as _;
use std::io::{BufRead, Write};
use std::ops::Range;

const BACKBONE_NAMES: [&str; 3] = [" N  ", " CA ", " C  "];
const BACKBONE_ELEMENTS: [&str; 3] = ["N", "C", "C"];

fn write_atoms(out: &mut String, structure: &Structure) {
    let mut serial = 1usize;
    for (k, chain) in structure.chains().iter().enumerate() {
        let Some(range) = structure.chain_range(k) else {
            continue;
        };
        for (number, frame) in structure.frames()[range].iter().enumerate() {
            for ((name, element), atom) in BACKBONE_NAMES
                .iter()
                .zip(BACKBONE_ELEMENTS)
                .zip(frame.backbone_atoms())
            {
                let _ = writeln!(
                    out,
                    "ATOM  {:>5} {} GLY {}{:>4}    {:>8.3}{:>8.3}{:>8.3}{:>6.2}{:>6.2}          {:>2}",
                    serial % 100_000,
                    name,
                    chain.label,
                    (number + 1) % 10_000,
                    atom.x,
                    atom.y,
                    atom.z,
                    1.0,
                    0.0,
                    element
                );
                serial += 1;
            }
        }
        let _ = writeln!(out, "TER");
    }
}

/// Writes one structure as a single-model PDB.
pub fn write_structure<W: Write>(writer: &mut W, structure: &Structure) -> std::io::Result<()> {
    let mut out = String::new();
    write_atoms(&mut out, structure);
    out.push_str("END\n");
    writer.write_all(out.as_bytes())
}

/// Writes several structures as consecutive `MODEL` records.
pub fn write_models<'s, W, I>(writer: &mut W, models: I) -> std::io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'s Structure>,
{
    let mut out = String::new();
    for (index, structure) in models.into_iter().enumerate() {
        let _ = writeln!(out, "MODEL     {:>4}", index + 1);
        write_atoms(&mut out, structure);
        out.push_str("ENDMDL\n");
    }
    out.push_str("END\n");
    writer.write_all(out.as_bytes())
}

#[derive(Default)]
struct ResidueAtoms {
    /// Chain identifier and residue number with insertion code, columns 22-27.
    key: (char, String),
    number: i32,
    atoms: [Option<Point3<f64>>; 3],
}

/// Reads the first model of a PDB into a structure, one chain per chain identifier in order
/// of appearance. Residues missing any of N, CA or C are skipped.
pub fn read_structure<R: BufRead>(reader: R) -> anyhow::Result<Structure> {
    read_numbered(reader).map(|(structure, _)| structure)
}

/// Like [`read_structure`], keeping the residue number of every residue so that motif
/// references resolve against the file's own numbering.
pub fn read_reference<R: BufRead>(reader: R) -> anyhow::Result<ReferenceStructure> {
    let (structure, numbers) = read_numbered(reader)?;
    Ok(ReferenceStructure::new(structure, numbers)?)
}

/// Fixed-width columns of a record; non-ASCII text can split a column inside a character.
fn column(line: &str, range: Range<usize>, line_number: usize) -> anyhow::Result<&str> {
    match line.get(range.clone()) {
        Some(text) => Ok(text),
        None => bail!(
            "line {}: columns {}-{} do not fall on character boundaries",
            line_number,
            range.start + 1,
            range.end
        ),
    }
}

fn read_numbered<R: BufRead>(reader: R) -> anyhow::Result<(Structure, Vec<i32>)> {
    let mut residues: Vec<ResidueAtoms> = Vec::new();

    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;
        let line_number = line_number + 1;
        if line.starts_with("ENDMDL") {
            break;
        }
        if !(line.starts_with("ATOM  ") || line.starts_with("HETATM")) {
            continue;
        }
        let Some(slot) = line
            .get(12..16)
            .and_then(|name| ["N", "CA", "C"].iter().position(|n| *n == name.trim()))
        else {
            continue;
        };
        if line.len() < 54 {
            bail!("line {}: ATOM record is too short", line_number);
        }
        let chain = column(&line, 21..22, line_number)?.chars().next().unwrap_or(' ');
        let number = column(&line, 22..26, line_number)?
            .trim()
            .parse::<i32>()
            .with_context(|| format!("line {}: invalid residue number", line_number))?;
        let residue_key = column(&line, 22..27, line_number)?.to_string();
        let coordinate = |range: Range<usize>| -> anyhow::Result<f64> {
            column(&line, range, line_number)?
                .trim()
                .parse::<f64>()
                .with_context(|| format!("line {}: invalid coordinate", line_number))
        };
        let point = Point3::new(coordinate(30..38)?, coordinate(38..46)?, coordinate(46..54)?);

        let key = (chain, residue_key);
        if residues.last().is_none_or(|r| r.key != key) {
            residues.push(ResidueAtoms {
                key,
                number,
                ..Default::default()
            });
        }
        if let Some(current) = residues.last_mut() {
            current.atoms[slot].get_or_insert(point);
        }
    }

    let mut frames = Vec::new();
    let mut numbers = Vec::new();
    let mut chains: Vec<ChainInfo> = Vec::new();
    for residue in &residues {
        let [Some(n), Some(ca), Some(c)] = residue.atoms else {
            continue;
        };
        let frame = RigidFrame::from_backbone(&n, &ca, &c)
            .ok_or_else(|| anyhow!("degenerate backbone at residue {}{}", residue.key.0, residue.key.1.trim()))?;
        frames.push(frame);
        numbers.push(residue.number);
        match chains.last_mut() {
            Some(last) if last.label == residue.key.0 => last.length += 1,
            _ => chains.push(ChainInfo::new(residue.key.0, 1, true)),
        }
    }
    if frames.is_empty() {
        bail!("no residue with complete N, CA and C atoms was found");
    }
    Ok((Structure::new(frames, chains)?, numbers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{UnitQuaternion, Vector3};
    use std::io::Cursor;

    fn two_chains() -> Structure {
        let frames = (0..5)
            .map(|i| {
                RigidFrame::new(
                    UnitQuaternion::from_scaled_axis(Vector3::new(0.1 * i as f64, 0.3, -0.2)),
                    Point3::new(3.8 * i as f64, 1.0, -2.0),
                )
            })
            .collect();
        Structure::new(
            frames,
            vec![ChainInfo::new('A', 3, true), ChainInfo::new('B', 2, true)],
        )
        .unwrap()
    }

    #[test]
    fn written_backbone_reads_back_to_the_same_frames() {
        let structure = two_chains();
        let mut buffer = Vec::new();
        write_structure(&mut buffer, &structure).unwrap();
        let text = String::from_utf8(buffer.clone()).unwrap();
        assert_eq!(text.lines().filter(|l| l.starts_with("ATOM")).count(), 15);
        assert_eq!(text.lines().filter(|l| *l == "TER").count(), 2);

        let read = read_structure(Cursor::new(buffer)).unwrap();
        assert_eq!(read.chains(), structure.chains());
        for (a, b) in read.frames().iter().zip(structure.frames()) {
            // Coordinates are written with three decimals.
            assert!((a.position - b.position).norm() < 2e-3);
            assert!(a.orientation.angle_to(&b.orientation) < 5e-3);
        }
    }

    #[test]
    fn reader_skips_incomplete_residues_and_other_records() {
        let pdb = "\
HEADER    TEST
ATOM      1  N   GLY A   1      -0.527   1.359   0.000  1.00  0.00           N
ATOM      2  CA  GLY A   1       0.000   0.000   0.000  1.00  0.00           C
ATOM      3  C   GLY A   1       1.523   0.000   0.000  1.00  0.00           C
ATOM      4  O   GLY A   1       2.100   1.000   0.000  1.00  0.00           O
ATOM      5  CA  GLY A   2       3.800   0.000   0.000  1.00  0.00           C
END
";
        let structure = read_structure(Cursor::new(pdb)).unwrap();
        assert_eq!(structure.len(), 1);
        assert!(structure.frames()[0].position.coords.norm() < 1e-9);
    }

    #[test]
    fn reference_keeps_the_file_numbering() {
        let pdb = "\
ATOM      1  N   GLY A  10      -0.527   1.359   0.000  1.00  0.00           N
ATOM      2  CA  GLY A  10       0.000   0.000   0.000  1.00  0.00           C
ATOM      3  C   GLY A  10       1.523   0.000   0.000  1.00  0.00           C
ATOM      4  N   GLY A  14       3.273   1.359   0.000  1.00  0.00           N
ATOM      5  CA  GLY A  14       3.800   0.000   0.000  1.00  0.00           C
ATOM      6  C   GLY A  14       5.323   0.000   0.000  1.00  0.00           C
ATOM      7  N   GLY B  -3      -0.527   1.359   5.000  1.00  0.00           N
ATOM      8  CA  GLY B  -3       0.000   0.000   5.000  1.00  0.00           C
ATOM      9  C   GLY B  -3       1.523   0.000   5.000  1.00  0.00           C
END
";
        let reference = read_reference(Cursor::new(pdb)).unwrap();
        assert_eq!(reference.numbers(), &[10, 14, -3]);
        assert_eq!(reference.position('A', 14), Some(1));
        assert_eq!(reference.position('A', 11), None);
        assert!((reference.frame('B', -3).unwrap().position.z - 5.0).abs() < 1e-9);
    }

    #[test]
    fn non_ascii_text_in_fixed_columns_is_an_error_not_a_panic() {
        let pdb = "\
HEADER    TEST
ATOM      1  N   GLYé   1      -0.527   1.359   0.000  1.00  0.00           N
END
";
        let error = read_structure(Cursor::new(pdb)).unwrap_err();
        assert!(error.to_string().contains("line 2"), "{}", error);

        let in_coordinates = "ATOM      1  CA  GLY A   1       0.0é0   0.000   0.000  1.00  0.00           C\n";
        assert!(read_structure(Cursor::new(in_coordinates)).is_err());
    }

    #[test]
    fn non_numeric_residue_number_is_rejected() {
        let pdb = "ATOM      1  CA  GLY A  1x       0.000   0.000   0.000  1.00  0.00           C\n";
        let error = read_structure(Cursor::new(pdb)).unwrap_err();
        assert!(error.to_string().contains("residue number"), "{}", error);
    }

    #[test]
    fn reader_rejects_files_without_backbone() {
        assert!(read_structure(Cursor::new("HEADER    EMPTY\nEND\n")).is_err());
    }

    #[test]
    fn models_are_numbered_in_order() {
        let structure = two_chains();
        let mut buffer = Vec::new();
        write_models(&mut buffer, [&structure, &structure]).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("MODEL        1"));
        assert!(text.contains("MODEL        2"));
        assert_eq!(text.matches("ENDMDL").count(), 2);

        // Only the first model is read back.
        let read = read_structure(Cursor::new(text)).unwrap();
        assert_eq!(read.len(), 5);
    }
}
