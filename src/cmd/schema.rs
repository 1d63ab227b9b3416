use clean_csv::json_schema;
use std::fs;
use std::path::PathBuf;

pub fn run(name: Option<String>, output_dir: Option<PathBuf>, list: bool) -> anyhow::Result<()> {
    if list {
        for name in json_schema::schema_names() {
            println!("{}", name);
        }
        return Ok(());
    }

    if let Some(dir) = output_dir {
        fs::create_dir_all(&dir)?;
        let schemas = json_schema::all_schemas();
        for (name, schema) in &schemas {
            let path = dir.join(format!("{}.schema.json", name));
            fs::write(&path, serde_json::to_string_pretty(schema)? + "\n")?;
        }
        eprintln!("Wrote {} schemas to {}", schemas.len(), dir.display());
        return Ok(());
    }

    match name {
        Some(name) => {
            let schema = json_schema::get_schema(&name).ok_or_else(|| {
                anyhow::anyhow!(
                    "unknown schema '{}'. Available: {}",
                    name,
                    json_schema::schema_names().join(", ")
                )
            })?;
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
        None => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json_schema::all_schemas())?
            );
        }
    }
    Ok(())
}
