mod common;

use cei2tei::compare::{Finding, compare_trees};
use cei2tei::discovery::{self, EVIDENCE_FILE, FULL_PATHS_FILE, TRUNCATED_PATHS_FILE};
use cei2tei::validate::{SampleStatus, validate_corpus};
use cei2tei::{Settings, run};
use common::{CEI, TENOR_TO_TEI, TestResult, Workspace, charter};
use std::fs;

fn settings(ws: &Workspace) -> Settings {
    let mut settings = Settings::default();
    settings.input_directory = Some(ws.input());
    settings.output_directory = Some(ws.output());
    settings.xslt_stylesheet = Some(ws.stylesheet("tenor.xsl", TENOR_TO_TEI));
    settings.error_log = ws.report();
    settings.workers = 2;
    settings
}

#[test]
fn test_transform_then_compare() -> TestResult {
    let ws = Workspace::new();
    ws.add("1250/a.xml", &charter("Nos   Rudolfus dei gratia"))
        .add("1250/b.xml", &charter("In nomine domini"))
        .add("1300/c.xml", "<charter/>");
    let settings = settings(&ws);

    let summary = run(&settings.batch_config()?)?;
    assert_eq!((summary.succeeded, summary.failed), (2, 1));

    let report = compare_trees(&settings.comparison_config()?)?;
    assert_eq!(report.pairs_compared, 3);
    assert_eq!(report.matched, 2);
    assert_eq!(report.pairs_with_findings, 1);
    assert_eq!(report.pairs[2].file, "1300/c.xml");
    assert_eq!(report.pairs[2].findings, vec![Finding::MissingTarget]);
    Ok(())
}

#[test]
fn test_similarity_rule_from_settings_file() -> TestResult {
    let ws = Workspace::new();
    ws.add("a.xml", &charter("Nos Rudolfus rex"));
    fs::create_dir_all(ws.output())?;
    fs::write(
        ws.output().join("a.xml"),
        format!(r#"<TEI xmlns="{}"><div type="tenor">Nos Rudolfus imperator</div></TEI>"#, common::TEI),
    )?;
    let json = format!(
        r#"{{
            "input_directory": {input:?},
            "output_directory": {output:?},
            "comparison": {{
                "rules": [
                    {{"source": "//cei:tenor", "target": "//tei:div[@type='tenor']", "mode": "similarity", "threshold": 0.5}},
                    {{"source": "//cei:tenor", "target": "//tei:div[@type='tenor']", "mode": "exact"}}
                ]
            }}
        }}"#,
        input = ws.input().display().to_string(),
        output = ws.output().display().to_string(),
    );
    let settings = Settings::from_json(&json)?;

    let report = compare_trees(&settings.comparison_config()?)?;
    assert_eq!(report.matched, 1);
    assert!(matches!(
        &report.pairs[0].findings[..],
        [Finding::Unmatched { rule: 1, .. }]
    ));
    Ok(())
}

#[test]
fn test_discovery_writes_sorted_inventory() -> TestResult {
    let ws = Workspace::new();
    ws.add(
        "x/1.cei.xml",
        &format!(r#"<cei:text xmlns:cei="{CEI}" type="charter"><cei:p>a</cei:p><cei:p n="2">b</cei:p></cei:text>"#),
    )
    .add("y/2.cei.xml", &charter("Nos"))
    .add("y/3.cei.xml", "<broken")
    .add("y/ignored.xml", "<other/>");
    let mut settings = Settings::default();
    settings.input_directory = Some(ws.input());
    settings.discovery.output_directory = Some(ws.dir.path().join("shapes"));
    settings.discovery.threads = 2;

    let inventory = discovery::discover(&settings.discovery_config()?)?;
    assert_eq!(inventory.files_scanned, 2);
    assert_eq!(inventory.files_skipped.len(), 1);

    let shapes = ws.dir.path().join("shapes");
    let full = fs::read_to_string(shapes.join(FULL_PATHS_FILE))?;
    let full: Vec<&str> = full.lines().collect();
    assert!(full.contains(&"/cei:text/cei:p[2]/@n"));
    assert!(full.contains(&"/cei:text/cei:body/cei:tenor"));
    let mut sorted = full.clone();
    sorted.sort();
    assert_eq!(full, sorted);

    let truncated = fs::read_to_string(shapes.join(TRUNCATED_PATHS_FILE))?;
    assert!(truncated.lines().any(|l| l == "/cei:text/cei:p/@n"));
    assert!(!truncated.contains('['));

    let evidence: serde_json::Value = serde_json::from_str(&fs::read_to_string(shapes.join(EVIDENCE_FILE))?)?;
    assert_eq!(evidence["/cei:text/@type"]["documents"], 2);
    assert_eq!(evidence["/cei:text/@type"]["first_file"], "x/1.cei.xml");
    Ok(())
}

#[test]
fn test_validation_of_a_seeded_sample() -> TestResult {
    let ws = Workspace::new();
    for i in 0..20 {
        let body = if i % 4 == 0 { "<cei:q/>" } else { "<cei:p>ok</cei:p>" };
        ws.add(
            &format!("{:02}.cei.xml", i),
            &format!(r#"<cei:charter xmlns:cei="{CEI}"><cei:text>{body}</cei:text></cei:charter>"#),
        );
    }
    let schema = ws.dir.path().join("cei.xsd");
    fs::write(
        &schema,
        format!(
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema" targetNamespace="{CEI}" elementFormDefault="qualified">
                 <xs:element name="text"><xs:complexType><xs:sequence><xs:element name="p" type="xs:string"/></xs:sequence></xs:complexType></xs:element>
               </xs:schema>"#
        ),
    )?;
    let mut settings = Settings::default();
    settings.input_directory = Some(ws.input());
    settings.validation.schema = Some(schema);
    settings.validation.sample_size = 8;
    settings.validation.seed = Some(42);

    let first = validate_corpus(&settings.validation_config()?)?;
    let second = validate_corpus(&settings.validation_config()?)?;
    assert_eq!(first, second);
    assert_eq!(first.population, 20);
    assert_eq!(first.results.len(), 8);
    assert_eq!(first.valid + first.invalid, 8);

    for result in &first.results {
        let n: usize = result.file[..2].parse()?;
        match &result.status {
            SampleStatus::Valid => assert_ne!(n % 4, 0),
            SampleStatus::Invalid { errors } => {
                assert_eq!(n % 4, 0);
                assert!(!errors.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
    Ok(())
}
