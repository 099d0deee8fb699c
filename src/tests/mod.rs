mod support;

mod search;
