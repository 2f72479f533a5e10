mod chunker;
mod prune;
