use clap::{arg, Arg, ArgAction, ArgMatches, Command};
use expandlibs::{
    archive::{Mode, ZipReader, ZipWriter},
    deps,
    expand::Expander,
    ExpandConfig,
};
use serde::Serialize;
use std::{fs, io::stdout, path::PathBuf};

fn cli() -> Command {
    Command::new("expandlibs-tools")
        .about("Expand linker inputs, resolve dependent libraries, edit ZIPs in place")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("expand")
                .about("Expand linker argument tokens onto one line")
                .arg(
                    Arg::new("tokens")
                        .value_name("TOKEN")
                        .num_args(0..)
                        .trailing_var_arg(true)
                        .allow_hyphen_values(true),
                ),
        )
        .subcommand(
            Command::new("deps")
                .about("Write the transitive dependency manifest of a binary")
                .arg(arg!(binary: <BINARY>))
                .arg(
                    Arg::new("libpath")
                        .long("libpath")
                        .short('L')
                        .value_name("DIR")
                        .action(ArgAction::Append),
                )
                .arg(arg!(-o - -out[OUT]))
                .arg(arg!(-g - -gtest)),
        )
        .subcommand(
            Command::new("zip")
                .about("Edit and inspect ZIP archives")
                .subcommand_required(true)
                .subcommand(
                    Command::new("add")
                        .about("Add files to a ZIP, overwriting same-named entries")
                        .arg(arg!(archive: <ARCHIVE>))
                        .arg(
                            Arg::new("files")
                                .value_name("FILE")
                                .num_args(1..)
                                .required(true),
                        )
                        .arg(arg!(-c - -create))
                        .arg(arg!(-l - -lock)),
                )
                .subcommand(
                    Command::new("list")
                        .about("List the entries of a ZIP")
                        .arg(arg!(archive: <ARCHIVE>))
                        .arg(arg!(-j - -json))
                        .arg(arg!(-p - -pretty)),
                )
                .subcommand(
                    Command::new("read")
                        .about("Copy one entry of a ZIP to stdout")
                        .arg(arg!(archive: <ARCHIVE>))
                        .arg(arg!(entry: <ENTRY>)),
                ),
        )
}

pub fn main() {
    pretty_env_logger::init();
    let conf = ExpandConfig::from_env();
    let matches = cli().get_matches();
    match matches.subcommand() {
        Some(("expand", sub_matches)) => {
            let tokens: Vec<String> = sub_matches
                .get_many::<String>("tokens")
                .map(|v| v.cloned().collect())
                .unwrap_or_default();
            let expanded = Expander::new(&conf)
                .expand(tokens)
                .expect("Couldn't expand tokens");
            println!("{}", expanded.join(" "));
        }
        Some(("deps", sub_matches)) => {
            let binary = PathBuf::from(
                sub_matches
                    .get_one::<String>("binary")
                    .expect("Couldn't get binary from args"),
            );
            let dirs: Vec<PathBuf> = sub_matches
                .get_many::<String>("libpath")
                .map(|v| v.map(PathBuf::from).collect())
                .unwrap_or_default();
            let deps = deps::resolve(&conf, &binary, &dirs)
                .expect("Couldn't resolve dependent libraries");
            if let Some(out) = sub_matches.get_one::<String>("out") {
                fs::write(out, deps::manifest(&deps)).expect("Couldn't write manifest");
                if sub_matches.get_flag("gtest") {
                    fs::write(format!("{out}.gtest"), deps::gtest_manifest(&deps))
                        .expect("Couldn't write gtest manifest");
                }
            } else {
                print!("{}", deps::manifest(&deps));
            }
        }
        Some(("zip", zip_matches)) => match zip_matches.subcommand() {
            Some(("add", sub_matches)) => {
                let (archive, mode, lock) = zip_args(sub_matches);
                let mut writer =
                    ZipWriter::open(&archive, mode, lock).expect("Couldn't open archive");
                for file in sub_matches
                    .get_many::<String>("files")
                    .expect("Couldn't get files from args")
                {
                    let data = fs::read(file).expect("Couldn't read input file");
                    let name = PathBuf::from(file)
                        .file_name()
                        .expect("Couldn't get input filename")
                        .to_string_lossy()
                        .into_owned();
                    writer
                        .write_entry(&name, &data)
                        .expect("Couldn't write archive entry");
                }
                writer.close().expect("Couldn't close archive");
            }
            Some(("list", sub_matches)) => {
                let archive = PathBuf::from(
                    sub_matches
                        .get_one::<String>("archive")
                        .expect("Couldn't get archive path from args"),
                );
                let reader = ZipReader::open(&archive).expect("Couldn't open archive");
                let listing: Vec<EntryListing> = reader
                    .entries()
                    .iter()
                    .map(|e| EntryListing {
                        name: e.name.clone(),
                        size: e.uncompressed_size,
                        compressed_size: e.compressed_size,
                        method: e.compress_type,
                        offset: e.header_offset,
                    })
                    .collect();
                if sub_matches.get_flag("json") {
                    if sub_matches.get_flag("pretty") {
                        serde_json::to_writer_pretty(stdout().lock(), &listing)
                            .expect("Couldn't send entries");
                    } else {
                        serde_json::to_writer(stdout().lock(), &listing)
                            .expect("Couldn't send entries");
                    }
                    println!();
                } else {
                    for entry in &listing {
                        println!("{}", entry.name);
                    }
                }
            }
            Some(("read", sub_matches)) => {
                let archive = PathBuf::from(
                    sub_matches
                        .get_one::<String>("archive")
                        .expect("Couldn't get archive path from args"),
                );
                let entry = sub_matches
                    .get_one::<String>("entry")
                    .expect("Couldn't get entry from args");
                let mut reader = ZipReader::open(&archive).expect("Couldn't open archive");
                let mut entry = reader
                    .entry_reader(entry)
                    .expect("Couldn't open the entry in the archive");
                std::io::copy(&mut entry, &mut stdout().lock())
                    .expect("Couldn't copy into stdout");
            }
            _ => unreachable!(),
        },
        _ => unreachable!(),
    }
}

#[derive(Debug, Clone, Serialize)]
struct EntryListing {
    name: String,
    size: u64,
    compressed_size: u64,
    method: u16,
    offset: u64,
}

fn zip_args(sub_matches: &ArgMatches) -> (PathBuf, Mode, bool) {
    let archive = PathBuf::from(
        sub_matches
            .get_one::<String>("archive")
            .expect("Couldn't get archive path from args"),
    );
    let mode = if sub_matches.get_flag("create") {
        Mode::Write
    } else {
        Mode::Append
    };
    (archive, mode, sub_matches.get_flag("lock"))
}
