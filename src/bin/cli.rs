#![cfg(not(tarpaulin_include))]

use sheet_dashboard::export::ExportFormat;
use sheet_dashboard::loader::load_table;
use sheet_dashboard::registry::TableRegistry;
use sheet_dashboard::snippet::{self, PRINT_ROWS};
use sheet_dashboard::table::{PREVIEW_ROWS, Table};

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::Instant;

fn print_help() {
    println!("Commands:");
    println!("  tables: List loaded tables");
    println!("  show <name>: Print the first rows of a table");
    println!("  run: Execute the snippet typed so far");
    println!("  clear: Discard the snippet typed so far");
    println!("  export <path>: Write the last result to an .xlsx file (.csv paths get CSV)");
    println!("  q: Quit");
    println!("Any other line is added to the snippet.");
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <file> [<file> ...]", args[0]);
        return Ok(());
    }

    let mut registry = TableRegistry::new();
    for path in &args[1..] {
        let name = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(path)
            .to_string();
        let loaded = fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| load_table(&name, &bytes).map_err(|e| e.to_string()));
        match loaded {
            Ok(table) => {
                println!("{}: {} rows x {} columns", name, table.row_count(), table.column_count());
                registry.insert(name, table);
            }
            Err(e) => eprintln!("Error: {}: {}", path, e),
        }
    }
    if !registry.is_ready() {
        eprintln!("Warning: comparisons need at least two tables");
    }

    let mut buffer: Vec<String> = Vec::new();
    let mut last_result: Option<Table> = None;
    let mut status = String::from("ok");
    let mut start_time = Instant::now();
    loop {
        let elapsed_time = start_time.elapsed().as_secs_f64();
        print!("[{:.1}] ({}) {}> ", elapsed_time, status, buffer.len() + 1);
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        let command = line.trim_end_matches(['\n', '\r']);
        start_time = Instant::now();

        match command.trim() {
            "q" => break,
            "help" => print_help(),
            "tables" => {
                for (name, table) in registry.iter() {
                    println!(
                        "{} ({} rows): {}",
                        name,
                        table.row_count(),
                        table.column_names().join(", ")
                    );
                }
                status = String::from("ok");
            }
            "clear" => {
                buffer.clear();
                status = String::from("ok");
            }
            "run" => {
                let code = buffer.join("\n");
                buffer.clear();
                match snippet::execute(&code, &mut registry, None) {
                    Ok(outcome) => {
                        println!("{}", outcome.message());
                        if let Some(result) = outcome.result {
                            println!("result:\n{}", result.render(PRINT_ROWS));
                            last_result = Some(result);
                        }
                        status = String::from("ok");
                    }
                    Err(e) => {
                        println!("{}", e);
                        status = String::from("error");
                    }
                }
            }
            cmd if cmd.starts_with("show ") => match registry.get(cmd[5..].trim()) {
                Ok(table) => {
                    println!("{}", table.render(PREVIEW_ROWS));
                    status = String::from("ok");
                }
                Err(e) => {
                    println!("{}", e);
                    status = String::from("unknown table");
                }
            },
            cmd if cmd.starts_with("export ") => {
                let path = cmd[7..].trim();
                status = match &last_result {
                    None => String::from("nothing to export"),
                    Some(table) => match ExportFormat::from_path(path).write(table) {
                        Ok(bytes) => match fs::write(path, bytes) {
                            Ok(()) => String::from("ok"),
                            Err(e) => format!("write failed: {}", e),
                        },
                        Err(e) => e.to_string(),
                    },
                };
            }
            _ => buffer.push(command.to_string()),
        }
    }

    Ok(())
}
