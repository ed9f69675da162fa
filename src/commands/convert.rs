use anyhow::Result;

use crate::cli::{ConvertCorpusArgs, ConvertQrelsArgs, ConvertQueriesArgs};
use crate::convert::{convert_corpus, convert_qrels, convert_queries};

pub fn run_corpus(args: ConvertCorpusArgs) -> Result<()> {
    convert_corpus(&args.input, &args.output)?;
    Ok(())
}

pub fn run_queries(args: ConvertQueriesArgs) -> Result<()> {
    convert_queries(&args.input, &args.output, args.qrels.as_deref())?;
    Ok(())
}

pub fn run_qrels(args: ConvertQrelsArgs) -> Result<()> {
    convert_qrels(&args.input, &args.output)?;
    Ok(())
}
