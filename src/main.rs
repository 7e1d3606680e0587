use classgen::codegen::{ClassAssembler, InvokeKind, MethodAssembler, Settings};
use classgen::jvm::{
    self, BinaryName, ClassAccessFlags, FieldType, MethodAccessFlags, Name, UnqualifiedName,
};

use clap::{arg, command, value_parser, Command};
use std::fs;
use std::path::Path;

fn cli() -> Command {
    command!()
        .about("Generates a demo class with one very long method, split to fit in a class file")
        .arg(arg!(--class <CLASS_NAME> "Name of the class to generate (eg. `me.Demo`)"))
        .arg(
            arg!(--statements <COUNT> "Number of statements in the `run` method")
                .value_parser(value_parser!(usize))
                .default_value("10000"),
        )
        .arg(
            arg!(--"split-length" [BYTES] "Split methods longer than this (1 to 65535)")
                .value_parser(value_parser!(u16).range(1..)),
        )
        .arg(arg!(--"line-numbers" "Emit a `LineNumberTable` for every method"))
        .arg(arg!(-o --"output-dir" <DIR> "Directory to write the class into").default_value("."))
}

fn main() -> Result<(), jvm::Error> {
    env_logger::init();

    let matches = cli().get_matches();

    let class_name = matches
        .get_one::<String>("class")
        .map(String::as_str)
        .unwrap_or_default();
    let class_name = BinaryName::from_java_name(class_name).map_err(jvm::Error::MalformedName)?;
    let statements = matches.get_one::<usize>("statements").copied().unwrap_or_default();

    let mut settings = Settings::default();
    if let Some(split_length) = matches.get_one::<u16>("split-length") {
        settings.split_length = *split_length as usize;
    }
    settings.line_numbers = matches.get_flag("line-numbers");

    log::info!(
        "Generating '{}' with {} statements",
        class_name.as_str(),
        statements
    );
    let class_bytes = generate_demo(class_name.clone(), statements, settings)?;

    let output_dir = matches
        .get_one::<String>("output-dir")
        .map(String::as_str)
        .unwrap_or(".");
    let class_file = Path::new(output_dir).join(format!("{}.class", class_name.as_str()));
    if let Some(parent) = class_file.parent() {
        fs::create_dir_all(parent)?;
    }
    log::info!("Writing '{}'", class_file.display());
    fs::write(&class_file, class_bytes)?;

    Ok(())
}

fn method_name(name: &str) -> Result<UnqualifiedName, jvm::Error> {
    UnqualifiedName::from_string(String::from(name)).map_err(jvm::Error::MalformedName)
}

/// Class with a constructor, a `run` method printing `0` up to `statements - 1`, and a `main`
/// method calling `run`
fn generate_demo(
    class_name: BinaryName,
    statements: usize,
    settings: Settings,
) -> Result<Vec<u8>, jvm::Error> {
    let mut class = ClassAssembler::new(
        class_name,
        BinaryName::OBJECT,
        ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
        settings,
    );

    let init = class.new_method(None, UnqualifiedName::INIT, MethodAccessFlags::PUBLIC, vec![]);
    let mut init = class.method(init);
    init.call_super();
    init.method_return();
    init.complete();

    let static_method = MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC;
    let run_name = method_name("run")?;
    let run = class.new_method(None, run_name.clone(), static_method, vec![]);
    let mut run = class.method(run);
    for i in 0..statements {
        print_int(&mut run, i as i32)?;
    }
    run.method_return();
    run.complete();

    let string_array = FieldType::array(FieldType::object(BinaryName::STRING));
    let main = class.new_method(None, method_name("main")?, static_method, vec![string_array]);
    let mut main = class.method(main);
    main.call_method(InvokeKind::Static, None, run_name, None, 0);
    main.method_return();
    main.complete();

    class.finish()
}

/// `System.out.println(value);`
fn print_int(method: &mut MethodAssembler<'_>, value: i32) -> Result<(), jvm::Error> {
    let print_stream =
        BinaryName::from_java_name("java.io.PrintStream").map_err(jvm::Error::MalformedName)?;
    let system =
        BinaryName::from_java_name("java.lang.System").map_err(jvm::Error::MalformedName)?;
    method.get_static_field(system, method_name("out")?, FieldType::object(print_stream));
    method.push_int(value);
    method.call_method(InvokeKind::Virtual, None, method_name("println")?, None, 1);
    method.end_statement();
    Ok(())
}
