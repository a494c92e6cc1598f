pub mod duration;

use std::num::NonZeroUsize;
use std::path::PathBuf;

use clap::{builder::ValueParser, value_parser, Arg, ArgAction, Command};

use self::duration::{parse_duration, parse_overlap};

pub fn build_cli() -> Command {
    Command::new(env!("CARGO_PKG_NAME"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about("Slice WAV files into time-bounded, optionally overlapping chunks")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("length")
                .short('l')
                .long("length")
                .value_name("DURATION")
                .help("Length of each chunk (e.g. 4, 2.5s, 500ms, 1m30s)")
                .default_value("4s")
                .value_parser(ValueParser::new(parse_duration)),
        )
        .arg(
            Arg::new("overlap")
                .long("overlap")
                .value_name("DURATION")
                .help("Audio shared by neighbouring chunks on each side of a boundary")
                .default_value("0")
                .value_parser(ValueParser::new(parse_overlap)),
        )
        .arg(
            Arg::new("no-compress")
                .long("no-compress")
                .help("Write WAV chunks instead of encoding mono/stereo input to MP3")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("raw-header")
                .long("raw-header")
                .help("Reuse the input's own header layout instead of a canonical header")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("bitrate")
                .short('b')
                .long("bitrate")
                .value_name("KBPS")
                .help("MP3 bitrate in kbit/s")
                .default_value("128")
                .value_parser(value_parser!(u32).range(8..=320)),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("OUTPUT_DIR")
                .help("Directory for the chunks [default: sibling directory named after the input]")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("threads")
                .short('j')
                .long("threads")
                .value_name("N")
                .help("Number of chunks produced concurrently [default: available cores]")
                .value_parser(value_parser!(NonZeroUsize)),
        )
        .arg(
            Arg::new("encoder")
                .long("encoder")
                .value_name("PROGRAM")
                .help("MP3 encoder executable")
                .default_value("lame")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("manifest")
                .long("manifest")
                .value_name("PATH")
                .help("Write the chunk manifest as JSON to PATH")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("overwrite")
                .long("overwrite")
                .help("Allow overwriting existing files in the output directory")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Preview the planned chunks without writing files")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("file_path")
                .value_name("FILE_PATH")
                .help("Path to the input WAV file")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
}
