use arrow::util::pretty::pretty_format_batches;
use licsync::{config::Config, store::ParquetLayer};
use parquet::file::reader::{FileReader, SerializedFileReader};
use std::{
    env,
    fs::File,
    path::{Path, PathBuf},
    process::exit,
};

fn main() {
    // Expect a layer file, or a config whose layer should be shown.
    let args: Vec<String> = env::args().collect();
    let path = match args.as_slice() {
        [_, flag, cfg] if flag == "--config" => match Config::load(Path::new(cfg)) {
            Ok(c) => c.layer_path(),
            Err(e) => {
                eprintln!("Error: {}", e);
                exit(1);
            }
        },
        [_, file] => PathBuf::from(file),
        _ => {
            eprintln!("Usage: {} <LAYER.parquet> | --config <licsync.yaml>", args[0]);
            exit(1);
        }
    };
    if let Err(e) = inspect_layer(path) {
        eprintln!("Error: {}", e);
        exit(1);
    }
}

/// Print the layer's schema, row count and contents.
fn inspect_layer(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let reader = SerializedFileReader::new(File::open(&path)?)?;
    let file_meta = reader.metadata().file_metadata();

    println!("=== Layer: {} ===", path.display());
    println!("Rows:       {}", file_meta.num_rows());
    println!("Row groups: {}", reader.metadata().num_row_groups());
    println!();

    println!("=== Columns ===");
    for col_desc in file_meta.schema_descr().columns() {
        let logical = col_desc
            .logical_type()
            .as_ref()
            .map_or("<none>".to_string(), |lt| format!("{:?}", lt));
        println!(
            "- {:<20} | Physical: {:<10} | Logical: {}",
            col_desc.name(),
            format!("{:?}", col_desc.physical_type()),
            logical
        );
    }
    println!();

    // Schema comes from the file, so no mapping is needed here.
    let batches = ParquetLayer::read_file(&path)?;
    println!("{}", pretty_format_batches(&batches)?);
    Ok(())
}
