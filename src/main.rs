use std::fs::OpenOptions;
use std::io::{self, Read, Seek, Write};

use clap::{Arg, ArgAction, Command};
use clap_num::maybe_hex;
use log::{error, warn};
use ocfs2_extcheck::alloc::ClusterTracker;
use ocfs2_extcheck::problem::{Confirm, Finding, Fixed, Interactive, Recorder};
use ocfs2_extcheck::superblock::VolumeInfo;
use ocfs2_extcheck::{Checker, O2Fs};
use prettytable::{Cell, Row, Table};
use serde_json::{json, Value};

const FSCK_OK: i32 = 0;
const FSCK_NONDESTRUCT: i32 = 1;
const FSCK_UNCORRECTED: i32 = 4;
const FSCK_ERROR: i32 = 8;
const FSCK_USAGE: i32 = 16;

struct Options {
    body: String,
    offset: u64,
    inodes: Vec<u64>,
    answer: Option<bool>,
    clusters: Option<u32>,
    dx: bool,
    xattr: bool,
    refcount: bool,
    superblock: bool,
    json: bool,
    verbose: bool,
}

fn findings_table(findings: &[Finding]) -> String {
    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("Code"),
        Cell::new("Owner"),
        Cell::new("Block"),
        Cell::new("Values"),
        Cell::new("Fixed"),
    ]));
    for finding in findings {
        let values = finding.prompt.values_string();
        table.add_row(Row::new(vec![
            Cell::new(finding.code),
            Cell::new(&finding.prompt.owner.to_string()),
            Cell::new(&finding.prompt.location.to_string()),
            Cell::new(&values),
            Cell::new(if finding.accepted { "yes" } else { "no" }),
        ]));
    }
    table.to_string()
}

fn check_inodes<T: Read + Write + Seek, C: Confirm>(
    fs: &mut O2Fs<T>,
    volume: VolumeInfo,
    prompter: C,
    opts: &Options,
) -> i32 {
    let mut recorder = Recorder::new(prompter);
    let mut tracker = ClusterTracker::new(volume.total_clusters as u64);
    let mut summaries: Vec<Value> = Vec::new();
    let mut failed = false;

    for &blkno in &opts.inodes {
        let mut di = match fs.read_inode(blkno) {
            Ok(di) => di,
            Err(err) => {
                error!("inode {}: {}", blkno, err);
                failed = true;
                continue;
            }
        };
        if !di.uses_extent_list() {
            warn!("inode {} keeps no extent list, skipping", blkno);
            continue;
        }
        if opts.verbose && !opts.json {
            println!("{}", di.to_string());
        }
        if opts.refcount {
            let mut checker = Checker::new(volume, &mut *fs, &mut recorder, &mut tracker);
            match checker.check_refcount_tree(&mut di) {
                Ok(Some(summary)) => summaries.push(json!({
                    "inode": blkno,
                    "tree": "refcount",
                    "summary": summary,
                })),
                Ok(None) => {}
                Err(err) => {
                    error!("inode {}: refcount tree check aborted: {}", blkno, err);
                    failed = true;
                    continue;
                }
            }
        }
        // the refcount pass owns tree membership; stand in for it here
        if di.has_refcount() {
            tracker.refcounts.register_file(di.i_refcount_loc, di.i_blkno);
        }

        let mut checker = Checker::new(volume, &mut *fs, &mut recorder, &mut tracker);
        match checker.check_extents(&mut di) {
            Ok(summary) => summaries.push(json!({
                "inode": blkno,
                "tree": "data",
                "summary": summary,
                "record": di.to_json(),
            })),
            Err(err) => {
                error!("inode {}: extent check aborted: {}", blkno, err);
                failed = true;
                continue;
            }
        }
        if opts.dx {
            match checker.check_dx_root(&di) {
                Ok(Some(summary)) => summaries.push(json!({
                    "inode": blkno,
                    "tree": "dx_root",
                    "summary": summary,
                })),
                Ok(None) => {}
                Err(err) => {
                    error!("inode {}: dx root check aborted: {}", blkno, err);
                    failed = true;
                }
            }
        }
        if opts.xattr {
            match checker.check_xattr_block(&mut di) {
                Ok(Some(summary)) => summaries.push(json!({
                    "inode": blkno,
                    "tree": "xattr",
                    "summary": summary,
                })),
                Ok(None) => {}
                Err(err) => {
                    error!("inode {}: xattr block check aborted: {}", blkno, err);
                    failed = true;
                }
            }
        }
    }

    if tracker.bitmap.has_duplicates() {
        warn!(
            "clusters claimed more than once: {:?}",
            tracker.bitmap.duplicate_clusters()
        );
    }

    let accepted = recorder.accepted();
    let declined = recorder.declined();
    let findings = recorder.into_findings();
    if opts.json {
        let report = json!({
            "volume": volume,
            "trees": summaries,
            "findings": findings,
            "clusters_in_use": tracker.bitmap.used_count(),
            "duplicate_clusters": tracker.bitmap.duplicate_clusters(),
        });
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{}", text),
            Err(err) => error!("while rendering the report: {}", err),
        }
    } else if !findings.is_empty() {
        println!("{}", findings_table(&findings));
    }

    if failed {
        FSCK_ERROR
    } else if declined > 0 {
        FSCK_UNCORRECTED
    } else if accepted > 0 {
        FSCK_NONDESTRUCT
    } else {
        FSCK_OK
    }
}

fn process_volume(opts: &Options) -> i32 {
    let file = match OpenOptions::new()
        .read(true)
        .write(opts.answer != Some(false))
        .open(&opts.body)
    {
        Ok(file) => file,
        Err(err) => {
            error!("{}: {}", opts.body, err);
            return FSCK_ERROR;
        }
    };

    let mut fs = match O2Fs::new(file, opts.offset) {
        Ok(fs) => fs,
        Err(err) => {
            eprintln!("O2Fs object creation error: {}", err);
            return FSCK_ERROR;
        }
    };

    if opts.superblock {
        if opts.json {
            match serde_json::to_string_pretty(&fs.superblock.to_json()) {
                Ok(text) => println!("{}", text),
                Err(err) => error!("while rendering the superblock: {}", err),
            }
        } else {
            fs.superblock.print_sp_info();
        }
    }

    let volume = fs.volume_info(opts.clusters);
    match opts.answer {
        Some(answer) => check_inodes(&mut fs, volume, Fixed(answer), opts),
        None => {
            let stdin = io::stdin();
            let prompter = Interactive::new(stdin.lock(), io::stdout());
            check_inodes(&mut fs, volume, prompter, opts)
        }
    }
}

fn cli() -> Command {
    Command::new("ocfs2_extcheck")
        .version("0.1.0")
        .about("Check and repair the extent trees of an OCFS2 volume.")
        .arg(
            Arg::new("body")
                .short('b')
                .long("body")
                .value_parser(clap::value_parser!(String))
                .required(true)
                .help("The path to the volume image or device."),
        )
        .arg(
            Arg::new("offset")
                .short('o')
                .long("offset")
                .value_parser(maybe_hex::<u64>)
                .default_value("0")
                .help("The volume starts at address 0x...."),
        )
        .arg(
            Arg::new("inode")
                .short('i')
                .long("inode")
                .value_parser(maybe_hex::<u64>)
                .action(ArgAction::Append)
                .help("Block number of an inode whose extent tree should be checked."),
        )
        .arg(
            Arg::new("yes")
                .short('y')
                .long("yes")
                .action(ArgAction::SetTrue)
                .conflicts_with("no")
                .help("Answer yes to every repair."),
        )
        .arg(
            Arg::new("no")
                .short('n')
                .long("no")
                .action(ArgAction::SetTrue)
                .help("Answer no to every repair and open the volume read-only."),
        )
        .arg(
            Arg::new("clusters")
                .long("clusters")
                .value_parser(maybe_hex::<u32>)
                .help("Number of clusters in the volume (default: the whole image)."),
        )
        .arg(
            Arg::new("dx")
                .short('d')
                .long("dx")
                .action(ArgAction::SetTrue)
                .help("Also check the index trees of indexed directories."),
        )
        .arg(
            Arg::new("xattr")
                .short('x')
                .long("xattr")
                .action(ArgAction::SetTrue)
                .help("Also check the extent lists held in external xattr blocks."),
        )
        .arg(
            Arg::new("refcount")
                .short('r')
                .long("refcount")
                .action(ArgAction::SetTrue)
                .help("Check the refcount tree of reflinked files before their data."),
        )
        .arg(
            Arg::new("superblock")
                .short('s')
                .long("superblock")
                .action(ArgAction::SetTrue)
                .help("Display the superblock information."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .short('j')
                .long("json")
                .action(ArgAction::SetTrue),
        )
}

fn main() {
    let matches = cli().get_matches();

    let verbose = matches.get_flag("verbose");
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if verbose { "debug" } else { "info" }),
    )
    .init();

    let body = match matches.get_one::<String>("body") {
        Some(body) => body.clone(),
        None => std::process::exit(FSCK_USAGE),
    };
    let answer = if matches.get_flag("yes") {
        Some(true)
    } else if matches.get_flag("no") {
        Some(false)
    } else {
        None
    };
    let opts = Options {
        body,
        offset: matches.get_one::<u64>("offset").copied().unwrap_or(0),
        inodes: matches
            .get_many::<u64>("inode")
            .map(|vals| vals.copied().collect())
            .unwrap_or_default(),
        answer,
        clusters: matches.get_one::<u32>("clusters").copied(),
        dx: matches.get_flag("dx"),
        xattr: matches.get_flag("xattr"),
        refcount: matches.get_flag("refcount"),
        superblock: matches.get_flag("superblock"),
        json: matches.get_flag("json"),
        verbose,
    };

    if opts.inodes.is_empty() && !opts.superblock {
        eprintln!("nothing to do: pass --inode or --superblock");
        std::process::exit(FSCK_USAGE);
    }

    std::process::exit(process_volume(&opts));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_is_consistent() {
        let cmd = cli();
        cmd.clone().debug_assert();
        assert!(cmd.get_author().is_none());
    }

    #[test]
    fn tree_switches_and_answers_parse() {
        let args = ["ocfs2_extcheck", "-b", "vol.img", "-i", "0x14", "-x", "-r", "-n"];
        let matches = cli().try_get_matches_from(args).unwrap();
        let inodes: Vec<u64> = matches.get_many::<u64>("inode").unwrap().copied().collect();
        assert_eq!(inodes, vec![20]);
        assert!(matches.get_flag("xattr"));
        assert!(matches.get_flag("refcount"));
        assert!(!matches.get_flag("dx"));

        assert!(cli()
            .try_get_matches_from(["ocfs2_extcheck", "-b", "vol.img", "-y", "-n"])
            .is_err());
    }
}
