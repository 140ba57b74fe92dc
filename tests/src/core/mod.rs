mod emit;
mod simplify;
mod support;
