use std::{
    fs::File,
    io::{self, BufRead, BufReader, Write},
};

use anyhow::Context as _;
use moffet::{
    backend::{ir::IrBackend, Backend},
    config::{self, BackendKind, Config},
    lexer::CharSource,
    Codegen, Driver, DriverError, Generated, Lexer, Parser,
};

type Source = CharSource<Box<dyn BufRead>>;

fn prompt(config: &Config) {
    if config.prompt {
        eprint!("moffet> ");
        let _ = io::stderr().flush();
    }
}

fn report<F>(res: &Result<Generated<F>, DriverError>) {
    match res {
        Ok(Generated::Definition(_)) => eprintln!("Parsed a function definition."),
        Ok(Generated::Extern(_)) => eprintln!("Parsed an extern"),
        Ok(Generated::Expression(_)) => eprintln!("Parsed a top-level expression"),
        Err(err) => eprintln!("Error: {}", err),
    }
}

fn driver<B: Backend>(source: Source, backend: B) -> Driver<Source, B> {
    Driver::new(Parser::new(Lexer::new(source)), Codegen::new(backend))
}

fn run_ir(source: Source, config: &Config) -> anyhow::Result<()> {
    let mut driver = driver(source, IrBackend::default());

    prompt(config);
    driver.run(|driver, res| {
        report(&res);
        if let Ok(generated) = res {
            let module = driver.codegen().backend().module();
            let name = &generated.function().name;
            if config.emit_ir {
                if let Some(func) = module.function(name) {
                    eprint!("{}", func);
                }
            }
            if let Generated::Expression(_) = &generated {
                match module.execute(name, &[]) {
                    Ok(value) => eprintln!("Evaluated to {}", value),
                    Err(err) => eprintln!("Error: {}", err),
                }
            }
        }
        prompt(config);
    });

    Ok(())
}

#[cfg(feature = "llvm")]
fn run_llvm(source: Source, config: &Config) -> anyhow::Result<()> {
    use inkwell::context::Context;
    use moffet::backend::llvm::LlvmBackend;

    let context = Context::create();
    let mut driver = driver(source, LlvmBackend::new(&context));

    prompt(config);
    driver.run(|_, res| {
        report(&res);
        if let Ok(generated) = res {
            if config.emit_ir {
                eprint!("{}", generated.function().print_to_string().to_string());
            }
        }
        prompt(config);
    });

    if config.emit_ir {
        println!("{}", driver.codegen().backend().print_to_string());
    }
    Ok(())
}

#[cfg(not(feature = "llvm"))]
fn run_llvm(_source: Source, _config: &Config) -> anyhow::Result<()> {
    anyhow::bail!("moffet was built without the llvm feature")
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Config::from_matches(&config::app().get_matches());

    let reader: Box<dyn BufRead> = match &config.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };
    let source = CharSource::new(reader);

    match config.backend {
        BackendKind::Ir => run_ir(source, &config),
        BackendKind::Llvm => run_llvm(source, &config),
    }
}
