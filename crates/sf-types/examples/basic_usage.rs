use sf_data::KnowledgeStore;
use sf_types::*;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("StrainFit basic usage example");

    // Field order does not matter for identity
    let params = ParameterSet::from_pairs([
        (PB_TEN, 80e6),
        (EMOD, 12e9),
        (KRATIO, 2.2),
        (PB_EMOD, 40e9),
        (PB_FRIC, 0.55),
        (PB_COH, 60e6),
    ])?;
    let reordered = ParameterSet::from_pairs(params.iter().collect::<Vec<_>>().into_iter().rev())?;
    println!("Parameters: {params}");
    println!("Fingerprint: {}", params.fingerprint());
    assert_eq!(params.fingerprint(), reordered.fingerprint());

    // A simulator history export: step, strain, stress (Pa)
    let history = "\
step strain stress
1 0.0000 0.0
2 -0.0010 -8.5e6
3 -0.0020 -16.1e6
4 -0.0030 -21.7e6
5 -0.0040 -24.0e6
6 -0.0050 -23.2e6
";
    let curve = Curve::from_history_export(history, 1e-6);
    println!("Parsed {} samples", curve.len());
    if let Some(peak) = curve.peak_point() {
        println!("Peak: strain {:.4}, stress {:.2} MPa", peak.strain, peak.stress);
    }

    // Cache the curve and read it back
    let dir = tempfile::tempdir()?;
    let store = KnowledgeStore::open(dir.path())?;
    let fingerprint = store.put(&params, &curve)?;
    println!("Stored as {}", store.record_path(&fingerprint).display());

    let cached = store.get(&reordered)?;
    assert_eq!(cached.as_ref(), Some(&curve));
    println!("Cache stats: {:?}", store.get_stats());

    Ok(())
}
