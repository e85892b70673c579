use std::{ffi::OsString, path::PathBuf};

use clap::{App, Arg, ArgMatches};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BackendKind {
    Ir,
    Llvm,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Config {
    /// Source file, stdin when absent
    pub input: Option<PathBuf>,
    pub backend: BackendKind,
    pub emit_ir: bool,
    pub prompt: bool,
}

pub fn app<'a, 'b>() -> App<'a, 'b> {
    App::new("moffet")
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::with_name("FILE")
                .help("source file to read instead of standard input")
                .index(1),
        )
        .arg(
            Arg::with_name("backend")
                .long("backend")
                .takes_value(true)
                .possible_values(&["ir", "llvm"])
                .default_value("ir")
                .help("code generation backend"),
        )
        .arg(
            Arg::with_name("emit-ir")
                .long("emit-ir")
                .help("print the generated code for every form"),
        )
        .arg(
            Arg::with_name("no-prompt")
                .long("no-prompt")
                .help("do not print the interactive prompt"),
        )
}

impl Config {
    pub fn from_matches(matches: &ArgMatches) -> Config {
        let input = matches.value_of_os("FILE").map(PathBuf::from);
        let backend = match matches.value_of("backend") {
            Some("llvm") => BackendKind::Llvm,
            _ => BackendKind::Ir,
        };

        Config {
            prompt: input.is_none() && !matches.is_present("no-prompt"),
            input,
            backend,
            emit_ir: matches.is_present("emit-ir"),
        }
    }

    pub fn from_args<I, T>(args: I) -> Result<Config, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = app().get_matches_from_safe(args)?;
        Ok(Config::from_matches(&matches))
    }
}
