use weaver::instrumenter::{Instrumenter, MethodOutcome};
use weaver::jvm::code::{parse_method, print_method, render_node, MethodCode};
use weaver::localvar::LocalVars;
use weaver::shadow::{BasicBlockMarker, BodyMarker, Marker};
use weaver::snippet::{Snippet, SnippetCode, SnippetKind, UnprocessedCode};
use weaver::weaver::{Error, PartialEvaluationLevel, Settings, StaticContexts, Weaver};

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::collections::HashMap;
use std::fs;

fn main() -> Result<(), Error> {
    env_logger::init();

    let matches = cli().get_matches();

    let input = matches
        .get_one::<String>("INPUT")
        .ok_or_else(|| Error::Fatal(String::from("missing method listing")))?;
    log::info!("Reading '{}'", input);
    let mut method = parse_method(&read(input)?)?;

    if matches.get_flag("blocks") {
        let marker = BasicBlockMarker {
            precise: matches.get_flag("precise"),
        };
        print!("{}", print_blocks(&method, &marker));
        return Ok(());
    }

    let mut settings = Settings::default();
    if let Some(level) = matches.get_one::<PartialEvaluationLevel>("parteval") {
        settings.partial_evaluation = *level;
    }
    if let Some(size) = matches.get_one::<usize>("max-size") {
        settings.max_method_size = *size;
    }

    let vars = LocalVars::new();
    let static_contexts = StaticContexts::standard();
    let mut snippets = vec![];
    for (flag, kind) in [
        ("before", SnippetKind::Before),
        ("after", SnippetKind::After),
        ("after-throwing", SnippetKind::AfterThrowing),
    ] {
        for file in files(&matches, flag) {
            log::info!("Reading snippet '{}'", file);
            let snippet_method = parse_method(&read(file)?)?;
            let template = UnprocessedCode::new(snippet_method.owner.clone(), snippet_method);
            let code = SnippetCode::prepare(
                &template,
                true,
                false,
                &HashMap::new(),
                settings.code_options,
                &vars,
                &static_contexts,
            )?;
            snippets.push(Snippet::new(kind, 0, Box::new(BodyMarker), code));
        }
    }

    let weaver = Weaver::new(settings, vars).with_static_contexts(static_contexts);
    let instrumenter = Instrumenter::new(weaver, snippets);
    match instrumenter.instrument_method(&mut method)? {
        MethodOutcome::Unchanged => log::info!("Nothing to weave"),
        MethodOutcome::Instrumented => log::info!("Instrumented {}", method.display_name()),
        MethodOutcome::Reverted(err) => log::error!("{}", err),
    }
    print!("{}", print_method(&method));
    Ok(())
}

fn cli() -> Command {
    Command::new("JVM method weaver")
        .version("0.1.0")
        .author("Alec Theriault <alec.theriault@gmail.com>")
        .about("Weave snippet listings into a JVM method listing")
        .arg(
            Arg::new("before")
                .long("before")
                .value_name("FILE")
                .action(ArgAction::Append)
                .help("Snippet to run before the method body"),
        )
        .arg(
            Arg::new("after")
                .long("after")
                .value_name("FILE")
                .action(ArgAction::Append)
                .help("Snippet to run after the method body, however it exits"),
        )
        .arg(
            Arg::new("after-throwing")
                .long("after-throwing")
                .value_name("FILE")
                .action(ArgAction::Append)
                .help("Snippet to run when the method body throws"),
        )
        .arg(
            Arg::new("parteval")
                .long("parteval")
                .value_name("LEVEL")
                .value_parser(value_parser!(PartialEvaluationLevel))
                .help("Partially evaluate woven snippets (`O0`, `O1`, `O2`, `O3` or `Ox`)"),
        )
        .arg(
            Arg::new("blocks")
                .long("blocks")
                .action(ArgAction::SetTrue)
                .help("Print the basic blocks of the method instead of weaving"),
        )
        .arg(
            Arg::new("precise")
                .long("precise")
                .action(ArgAction::SetTrue)
                .requires("blocks")
                .help("Only with `--blocks`: also end blocks after instructions that might throw"),
        )
        .arg(
            Arg::new("max-size")
                .long("max-size")
                .value_name("N")
                .value_parser(value_parser!(usize))
                .help("Revert the method if its code grows past this many bytes"),
        )
        .arg(
            Arg::new("INPUT")
                .help("Method listing to instrument")
                .required(true)
                .index(1),
        )
}

fn read(path: &str) -> Result<String, Error> {
    fs::read_to_string(path).map_err(|err| {
        log::error!("Cannot read '{}'", path);
        Error::IoError(err)
    })
}

fn files<'a>(matches: &'a ArgMatches, flag: &str) -> impl Iterator<Item = &'a String> {
    matches.get_many::<String>(flag).into_iter().flatten()
}

/// One line per basic block, its instructions separated by `; `
fn print_blocks(method: &MethodCode, marker: &BasicBlockMarker) -> String {
    let insns = &method.instructions;
    let mut output = String::new();
    for (index, region) in marker.mark(method).iter().enumerate() {
        let end = match region.ends.first() {
            Some(end) => *end,
            None => continue,
        };
        let mut rendered = vec![];
        let mut cursor = Some(region.start);
        while let Some(id) = cursor {
            rendered.extend(render_node(insns.node(id)));
            cursor = if id == end { None } else { insns.next(id) };
        }
        output.push_str(&format!("block {}: {}\n", index, rendered.join("; ")));
    }
    output
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn arguments_are_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn precise_needs_blocks() {
        assert!(cli()
            .try_get_matches_from(["jweave", "--precise", "method.txt"])
            .is_err());
        let matches = cli()
            .try_get_matches_from(["jweave", "--blocks", "--precise", "method.txt"])
            .unwrap();
        assert!(matches.get_flag("precise"));
    }

    #[test]
    fn unreadable_listings_are_io_errors() {
        let missing = std::env::temp_dir().join("jweave-no-such-listing.txt");
        let result = read(&missing.to_string_lossy());
        assert!(matches!(result, Err(Error::IoError(_))));
    }

    #[test]
    fn blocks_list_every_instruction() {
        let method = parse_method(
            r#"
            method static f (I)I
              iload 0
              ifeq ZERO
              iconst_1
              ireturn
            ZERO:
              iconst_0
              ireturn
            "#,
        )
        .unwrap();
        let marker = BasicBlockMarker { precise: false };
        assert_eq!(
            print_blocks(&method, &marker),
            "block 0: iload 0; ifeq\nblock 1: iconst_1; ireturn\nblock 2: iconst_0; ireturn\n"
        );
    }
}
