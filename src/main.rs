// src/main.rs

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Result};
use fsindex::{Engine, TransferOp};

const USAGE: &str = "Usage: fsindex <db-path> <command> [args]\n\
    Commands:\n\
      scan <root>...        index one or more roots\n\
      mkdir <path>          create a folder and index it\n\
      cp <src> <dst>        copy and reconcile the index\n\
      mv <src> <dst>        move (cut) and reconcile the index\n\
      query <sql>           run SQL, print the normalized result\n\
      search <term>         substring search over indexed names\n\
      recent                most recently modified files\n\
      vacuum                reclaim database space\n\
      reset                 drop and recreate the index table";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("{USAGE}");
        return Ok(());
    }

    let db_path = PathBuf::from(&args[1]);
    let engine = Engine::open(&db_path)?;

    match args[2].as_str() {
        "scan" => {
            if args.len() < 4 {
                bail!("scan needs at least one root");
            }
            for root in &args[3..] {
                let summary = engine.scan(root).await?;
                tracing::info!(
                    "Indexed {}: {} files, {} dirs, {} skipped",
                    root,
                    summary.files,
                    summary.dirs,
                    summary.skipped
                );
            }
        }
        "mkdir" => {
            let path = args.get(3).map(PathBuf::from);
            let Some(path) = path else { bail!("mkdir needs a path") };
            let created = engine.create_folder(&path).await?;
            println!("{}", created.display());
        }
        "cp" | "mv" => {
            let (Some(src), Some(dst)) = (args.get(3), args.get(4)) else {
                bail!("{} needs <src> <dst>", args[2]);
            };
            let op = if args[2] == "cp" {
                TransferOp::Copy
            } else {
                TransferOp::Cut
            };
            let dest = engine.transfer(src, dst, op).await?;
            println!("{}", dest.display());
        }
        "query" => {
            let Some(sql) = args.get(3) else { bail!("query needs a SQL string") };
            let result = engine.query(sql, &[])?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        "search" => {
            let Some(term) = args.get(3) else { bail!("search needs a term") };
            for record in engine.store().search(term, 100)? {
                println!("{record}");
            }
        }
        "recent" => {
            for record in engine.store().recent(50)? {
                println!("{record}");
            }
        }
        "vacuum" => engine.store().vacuum()?,
        "reset" => engine.store().reset()?,
        other => {
            eprintln!("Unknown command: {other}\n{USAGE}");
        }
    }

    Ok(())
}
