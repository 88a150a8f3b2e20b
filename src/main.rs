use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::time::Instant;
use templar::{parse, parse_with, tokenize, xml_tag_definition, ParseOptions};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "templar")]
#[command(about = "Templar - component template parser")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse .html template files and report errors
    Parse {
        /// Path to a template file or directory
        #[arg(required_unless_present = "stdin")]
        file: Option<PathBuf>,

        /// Read from stdin
        #[arg(long)]
        stdin: bool,

        /// Output the AST as JSON
        #[arg(long)]
        json: bool,

        /// Output the token stream as JSON instead of the AST
        #[arg(long)]
        tokens: bool,

        /// Use XML tag definitions instead of HTML
        #[arg(long)]
        xml: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Parse { file, stdin, json, tokens, xml } => {
            let options = ParseOptions {
                tokenize_expansion_forms: true,
                selectorless_enabled: true,
                ..ParseOptions::default()
            };
            if stdin {
                parse_stdin(json, tokens, xml, &options);
            } else if let Some(path) = file {
                parse_path(&path, json, tokens, xml, &options);
            } else {
                eprintln!("Error: provide a file/directory or use --stdin");
                std::process::exit(1);
            }
        }
    }
}

fn parse_stdin(json_output: bool, tokens_output: bool, xml: bool, options: &ParseOptions) {
    let mut source = String::new();
    if io::stdin().read_to_string(&mut source).is_err() {
        eprintln!("Error: failed to read stdin");
        std::process::exit(1);
    }

    let error_count = parse_source(&source, "<stdin>", json_output, tokens_output, xml, options);
    if error_count > 0 {
        std::process::exit(1);
    }
}

fn parse_path(path: &PathBuf, json: bool, tokens: bool, xml: bool, options: &ParseOptions) {
    if path.is_file() {
        let start = Instant::now();
        let error_count = parse_file(path, json, tokens, xml, options);
        print_summary(1, error_count, start.elapsed());
        if error_count > 0 {
            std::process::exit(1);
        }
    } else if path.is_dir() {
        parse_directory(path, xml, options);
    } else {
        eprintln!("Error: {} does not exist", path.display());
        std::process::exit(1);
    }
}

fn parse_directory(dir: &PathBuf, xml: bool, options: &ParseOptions) {
    let start = Instant::now();
    let mut file_count = 0;
    let mut error_count = 0;

    for entry in WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "html"))
    {
        file_count += 1;
        error_count += parse_file(entry.path(), false, false, xml, options);
    }

    if file_count == 0 {
        eprintln!("No .html files found in {}", dir.display());
        std::process::exit(1);
    }

    print_summary(file_count, error_count, start.elapsed());
    if error_count > 0 {
        std::process::exit(1);
    }
}

fn parse_file(
    path: &Path,
    json: bool,
    tokens: bool,
    xml: bool,
    options: &ParseOptions,
) -> usize {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Error: failed to read {}: {err}", path.display());
            std::process::exit(1);
        }
    };
    let filename = path.display().to_string();
    parse_source(&source, &filename, json, tokens, xml, options)
}

fn parse_source(
    source: &str,
    filename: &str,
    json: bool,
    tokens: bool,
    xml: bool,
    options: &ParseOptions,
) -> usize {
    if tokens {
        let resolver = if xml { xml_tag_definition } else { templar::html_tag_definition };
        let result = tokenize(source, filename, resolver, options);
        match serde_json::to_string_pretty(&result) {
            Ok(output) => println!("{output}"),
            Err(err) => eprintln!("Error: failed to serialize tokens: {err}"),
        }
        print_errors(&result.errors, source, filename);
        return result.errors.len();
    }

    let result = if xml {
        parse_with(source, filename, xml_tag_definition, options)
    } else {
        parse(source, filename, options)
    };

    if json {
        match serde_json::to_string_pretty(&result.root_nodes) {
            Ok(output) => println!("{output}"),
            Err(err) => eprintln!("Error: failed to serialize tree: {err}"),
        }
    } else {
        print_check(filename, result.errors.is_empty());
    }
    print_errors(&result.errors, source, filename);
    result.errors.len()
}

fn print_errors(errors: &[templar::ParseError], source: &str, filename: &str) {
    let is_tty = io::stderr().is_terminal();
    for error in errors {
        if is_tty {
            eprint!("{}", error.render_color(source, filename));
        } else {
            eprint!("{}", error.render(source, filename));
        }
    }
}

fn print_check(path: &str, ok: bool) {
    let is_tty = io::stderr().is_terminal();
    let mark = if ok { "✓" } else { "✗" };
    if is_tty {
        let color = if ok { "\x1b[32m" } else { "\x1b[31m" };
        eprintln!("  {color}{mark}\x1b[0m {path}");
    } else {
        eprintln!("  {mark} {path}");
    }
}

fn print_summary(file_count: usize, error_count: usize, elapsed: std::time::Duration) {
    let is_tty = io::stderr().is_terminal();
    let time_str = format_duration(elapsed);
    let files_word = if file_count == 1 { "file" } else { "files" };
    let summary = if error_count == 0 {
        format!("✨ Parsed {file_count} {files_word} in {time_str}")
    } else {
        let errors_word = if error_count == 1 { "error" } else { "errors" };
        format!("Parsed {file_count} {files_word} in {time_str}, {error_count} {errors_word}")
    };

    if is_tty {
        eprintln!("\n\x1b[1m{summary}\x1b[0m");
    } else {
        eprintln!("\n{summary}");
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let micros = d.as_micros();
    if micros < 1000 {
        format!("{}μs", micros)
    } else if micros < 1_000_000 {
        format!("{:.1}ms", micros as f64 / 1000.0)
    } else {
        format!("{:.2}s", d.as_secs_f64())
    }
}
