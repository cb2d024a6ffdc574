use clap::{App, Arg};
use rcssx::driver::{Driver, MapResolver};
use std::fs;

fn main() {
    let matches = App::new("rcssx")
        .version("0.1.0")
        .about("Interpreter for the cssx teaching language")
        .arg(
            Arg::with_name("script")
                .help("Primary .cssx source unit")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("unit")
                .long("unit")
                .value_name("HREF=PATH")
                .help("Extra source unit, resolvable from <run href=... />")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1),
        )
        .get_matches();

    let script = matches.value_of("script").unwrap();
    let source = read_source(script);

    let mut resolver = MapResolver::new();
    if let Some(units) = matches.values_of("unit") {
        for mapping in units {
            let mut parts = mapping.splitn(2, '=');
            match (parts.next(), parts.next()) {
                (Some(href), Some(path)) => resolver.insert(href, &read_source(path)),
                _ => {
                    eprintln!("Invalid --unit '{}', expected HREF=PATH", mapping);
                    std::process::exit(64);
                }
            }
        }
    }

    match Driver::new(&resolver).run_document(&source) {
        Ok(output) => {
            for fragment in &output.fragments {
                println!("{}", fragment);
            }
            for line in &output.prints {
                println!("{}", line);
            }
        }
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(65);
        }
    }
}

fn read_source(path: &str) -> String {
    match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("{}: {}", path, e);
            std::process::exit(66);
        }
    }
}
