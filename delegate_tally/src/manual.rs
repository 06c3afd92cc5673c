/*!

This is the long-form manual for `delegate_tally` and the `tally` program.

## The election

An assembly elects a fixed number of delegates. Every member is both a voter and a candidate.
Each ballot sheet has a fixed number of slots (the `votes` setting of the configuration), and
each slot names one member. A sheet can also be null as a whole, and a slot can be explicitly
marked as an invalid name. Null sheets are not counted at all; invalid names are only reported
in the statistics.

The candidates are ranked by number of votes. Candidates with the same number of votes are
ordered by name. Candidates are identified by their full name (first name and both surnames),
so two members with exactly the same name are counted as one candidate.

## The cutoff and the tiebreaker

The *cutoff* is the number of votes of the candidate ranked at the last seat. Every candidate
above the cutoff within the seats is elected outright. All the candidates sitting exactly at
the cutoff are *tied*, including those ranked below the seats. When there are more tied
candidates than seats left for them, a tiebreaker decides.

The tiebreaker is a sequence of runoff rounds among the tied candidates only. In each round,
every participant fills a ballot with exactly one slot per seat still open. A slot may be
marked as an invalid name but it cannot be left empty. The round is then tallied:

- if the seats can be filled without ambiguity, the tiebreaker ends and the final delegate
  list is known;
- otherwise the candidates above the new cutoff are confirmed, and a new round starts among
  the candidates still tied, for the seats that remain.

For example, with two seats and the results

|   | votes |
|---|-------|
| A | 10    |
| B | 8     |
| C | 8     |
| D | 5     |

`A` is elected and `B` and `C` play a runoff for the second seat.

## Changing the ballots during a tiebreaker

Cast ballots are locked while a tiebreaker exists. Unlocking is only possible once a
tiebreaker has started, and only holds for that tiebreaker. After unlocking, ballots can be changed,
and every change checks whether the set of tied candidates is still the one the tiebreaker
started with. If it is, the tiebreaker goes on, even if the counts moved. If it is not, the
tiebreaker is discarded, a message is shown and the lock is set again.

## The `tally` program

All the data lives in a workspace directory (`--workspace`, the current directory by default),
one JSON file per kind of data. Each file carries a digest of its content: a file that was
edited by hand is ignored.

```text
tally voters import members.xlsx --worksheet Members
tally configure --delegates 2 --votes 2 --electoral-area "Zona Centro"
tally ballot cast "Ana Garcia Lopez" "Luis Martin"
tally ballot cast "Ana Garcia Lopez" invalid:Unreadable
tally ballot null
tally results --out results.json
tally tiebreaker status
tally tiebreaker cast "Luis Martin"
tally tiebreaker finish
```

### Voter lists

Voters are read from an Excel (`.xlsx`) or a CSV file. The first row is a header. The columns
are, in order: first name, first surname, second surname and location. Rows without a first
name nor a first surname are skipped. A header with fewer than four columns is refused. The
first worksheet of a workbook is used unless `--worksheet` names another one.

### Ballot choices

The choices of a ballot are given by voter id or by full name. The special value `_` leaves
a slot empty (only on main ballots) and `invalid:LABEL` marks a slot as an invalid name.

### Tiebreaker rounds

Round ballots are cast with `tiebreaker cast`. `tiebreaker compute` shows the tally of the
round without recording it. `tiebreaker finish` tallies the round and records it. `tiebreaker
back` discards the ballots of the round, and `tiebreaker restart` discards the whole
tiebreaker and starts again from the current results, if they still have a tie. Completing,
restarting, backing up or restoring locks the cast ballots again.

### Results

`tally results` writes a JSON summary with the configuration, the statistics, the delegate
table and the tiebreaker rounds. With `--reference`, the summary is compared with a previous
summary and the differences are printed.

### Backups

`tally backup` moves all the data of the workspace into a backup and leaves an empty
workspace. `tally restore` brings it back. A backup expires 12 hours after it was made.

 */
